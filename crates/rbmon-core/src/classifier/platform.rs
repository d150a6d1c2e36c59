//! Host OS family detection for tier-list dispatch.
//!
//! A wrong dispatch silently runs an inapplicable tier list, so Windows is
//! declared on ANY of several independent signals instead of trusting one.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::collector::traits::FileSystem;

/// Operating system family selecting the tier list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Linux,
    MacOs,
    Unknown,
}

/// Snapshot of the process environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Captures the current process environment.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect();
        Self { vars }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            vars: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

/// Independent observations about the host OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSignals {
    /// Target OS the binary was compiled for (`std::env::consts::OS`).
    pub compiled_os: String,
    /// Target family (`std::env::consts::FAMILY`): `windows` or `unix`.
    pub compiled_family: String,
    /// `WINDIR` or `windir` is set.
    pub windir_env: bool,
    /// `C:\Windows` exists.
    pub windows_dir: bool,
}

impl PlatformSignals {
    /// Observes the running host.
    pub fn capture(fs: &dyn FileSystem, env: &EnvSnapshot) -> Self {
        Self {
            compiled_os: std::env::consts::OS.to_string(),
            compiled_family: std::env::consts::FAMILY.to_string(),
            windir_env: env.contains("WINDIR") || env.contains("windir"),
            windows_dir: fs.exists(Path::new(r"C:\Windows"))
                || fs.exists(Path::new(r"c:\windows")),
        }
    }

    /// Signals of a plain Linux host, for tests and fixtures.
    pub fn linux() -> Self {
        Self {
            compiled_os: "linux".into(),
            compiled_family: "unix".into(),
            windir_env: false,
            windows_dir: false,
        }
    }

    pub fn windows() -> Self {
        Self {
            compiled_os: "windows".into(),
            compiled_family: "windows".into(),
            windir_env: true,
            windows_dir: true,
        }
    }

    pub fn macos() -> Self {
        Self {
            compiled_os: "macos".into(),
            compiled_family: "unix".into(),
            windir_env: false,
            windows_dir: false,
        }
    }

    fn windows_votes(&self) -> usize {
        [
            self.compiled_os == "windows",
            self.compiled_family == "windows",
            self.windir_env,
            self.windows_dir,
        ]
        .iter()
        .filter(|v| **v)
        .count()
    }
}

impl OsFamily {
    /// Picks the family from the signals.
    ///
    /// Any Windows signal wins; Linux and macOS are only chosen when no Windows
    /// signal is present.
    pub fn detect(signals: &PlatformSignals) -> Self {
        let votes = signals.windows_votes();
        if votes > 0 {
            if signals.compiled_os != "windows" {
                warn!(
                    "Windows markers present on a {} build ({} signals), using Windows tiers",
                    signals.compiled_os, votes
                );
            }
            return OsFamily::Windows;
        }

        let family = match signals.compiled_os.as_str() {
            "linux" | "android" => OsFamily::Linux,
            "macos" => OsFamily::MacOs,
            _ => OsFamily::Unknown,
        };
        debug!("OS family: {:?} ({})", family, signals.compiled_os);
        family
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_plain_families() {
        assert_eq!(OsFamily::detect(&PlatformSignals::linux()), OsFamily::Linux);
        assert_eq!(OsFamily::detect(&PlatformSignals::macos()), OsFamily::MacOs);
        assert_eq!(OsFamily::detect(&PlatformSignals::windows()), OsFamily::Windows);
    }

    #[test]
    fn test_any_windows_signal_wins() {
        let mut signals = PlatformSignals::linux();
        signals.windir_env = true;
        assert_eq!(OsFamily::detect(&signals), OsFamily::Windows);

        let mut signals = PlatformSignals::linux();
        signals.windows_dir = true;
        assert_eq!(OsFamily::detect(&signals), OsFamily::Windows);
    }

    #[test]
    fn test_unknown_os() {
        let mut signals = PlatformSignals::linux();
        signals.compiled_os = "freebsd".into();
        assert_eq!(OsFamily::detect(&signals), OsFamily::Unknown);
    }

    #[test]
    fn test_env_snapshot() {
        let env = EnvSnapshot::from_pairs(&[("windir", r"C:\Windows")]);
        assert!(env.contains("windir"));
        assert!(!env.contains("WINDIR"));
        assert_eq!(env.get("windir"), Some(r"C:\Windows"));
    }

    #[test]
    fn test_capture_reads_env_and_fs() {
        let mut fs = crate::collector::mock::MockFs::new();
        fs.add_dir(r"C:\Windows");
        let env = EnvSnapshot::default();

        let signals = PlatformSignals::capture(&fs, &env);
        assert!(signals.windows_dir);
        assert!(!signals.windir_env);
        assert_eq!(OsFamily::detect(&signals), OsFamily::Windows);
    }
}
