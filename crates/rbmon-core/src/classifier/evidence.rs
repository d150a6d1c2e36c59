//! Normalized evidence snapshots collected by classifier tiers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::collector::traits::FileSystem;

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvidenceSource {
    VirtTool,
    MarkerFile,
    Cgroup,
    EnvVar,
    SystemVendor,
    ProductName,
    BiosVendor,
    BiosVersion,
    ProductSerial,
    CpuInfo,
    CpuFeatures,
    Interfaces,
    Drivers,
    Registry,
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VirtTool => "virt_tool",
            Self::MarkerFile => "marker_file",
            Self::Cgroup => "cgroup",
            Self::EnvVar => "env_var",
            Self::SystemVendor => "sys_vendor",
            Self::ProductName => "product_name",
            Self::BiosVendor => "bios_vendor",
            Self::BiosVersion => "bios_version",
            Self::ProductSerial => "product_serial",
            Self::CpuInfo => "cpuinfo",
            Self::CpuFeatures => "cpu_features",
            Self::Interfaces => "interfaces",
            Self::Drivers => "drivers",
            Self::Registry => "registry",
        };
        f.write_str(name)
    }
}

/// Lowercased, trimmed token as used by every table match.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Read-only mapping from signal source to normalized token.
///
/// Tiers fill one of these from the host, log it, and then decide on it.
/// Missing or unreadable sources are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    tokens: BTreeMap<EvidenceSource, String>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; empty values are dropped.
    pub fn with(mut self, source: EvidenceSource, raw: &str) -> Self {
        self.insert(source, raw);
        self
    }

    pub fn insert(&mut self, source: EvidenceSource, raw: &str) {
        let token = normalize(raw);
        if !token.is_empty() {
            self.tokens.insert(source, token);
        }
    }

    /// Reads `path` and records it under `source`. Errors leave the source absent.
    pub fn read_file(&mut self, fs: &dyn FileSystem, source: EvidenceSource, path: &str) {
        match fs.read_to_string(Path::new(path)) {
            Ok(content) => self.insert(source, &content),
            Err(e) => debug!("evidence {}: {} unavailable ({})", source, path, e),
        }
    }

    pub fn get(&self, source: EvidenceSource) -> Option<&str> {
        self.tokens.get(&source).map(String::as_str)
    }

    /// Returns the token for `source`, or `""` when absent.
    pub fn token(&self, source: EvidenceSource) -> &str {
        self.get(source).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Emits the snapshot at debug level, truncating long values.
    pub fn log(&self, tier: &str) {
        for (source, token) in &self.tokens {
            let shown: String = token.chars().take(120).collect();
            debug!("tier {}: {}='{}'", tier, source, shown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    #[test]
    fn test_insert_normalizes_and_skips_empty() {
        let ev = Evidence::new()
            .with(EvidenceSource::SystemVendor, "  QEMU \n")
            .with(EvidenceSource::ProductName, "   ");

        assert_eq!(ev.get(EvidenceSource::SystemVendor), Some("qemu"));
        assert_eq!(ev.get(EvidenceSource::ProductName), None);
        assert_eq!(ev.token(EvidenceSource::ProductName), "");
    }

    #[test]
    fn test_read_file_missing_is_absent() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/class/dmi/id/sys_vendor", "VMware, Inc.\n");

        let mut ev = Evidence::new();
        ev.read_file(&fs, EvidenceSource::SystemVendor, "/sys/class/dmi/id/sys_vendor");
        ev.read_file(&fs, EvidenceSource::ProductName, "/sys/class/dmi/id/product_name");

        assert_eq!(ev.get(EvidenceSource::SystemVendor), Some("vmware, inc."));
        assert!(ev.get(EvidenceSource::ProductName).is_none());
    }
}
