//! In-memory mock filesystem for testing evidence gathering without a real host.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory so tests can simulate DMI tables,
/// container sentinel files and `/sys/class/net` listings on any platform.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Paths that exist but cannot be read.
    denied: HashSet<PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Removes a file, leaving its parent directories in place.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Adds a file that exists but fails to read with `PermissionDenied`.
    pub fn add_unreadable(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.denied.insert(path);
    }

    /// Populates `/sys/class/dmi/id` with the four identity strings.
    ///
    /// Empty values are skipped so the file reads as missing.
    pub fn add_dmi(&mut self, sys_vendor: &str, product_name: &str, bios_vendor: &str, serial: &str) {
        let base = Path::new("/sys/class/dmi/id");
        for (name, value) in [
            ("sys_vendor", sys_vendor),
            ("product_name", product_name),
            ("bios_vendor", bios_vendor),
            ("product_serial", serial),
        ] {
            if !value.is_empty() {
                self.add_file(base.join(name), format!("{}\n", value));
            }
        }
    }

    /// Adds one directory per name under `/sys/class/net`.
    pub fn add_interfaces(&mut self, names: &[&str]) {
        let base = Path::new("/sys/class/net");
        self.add_dir(base);
        for name in names {
            self.add_dir(base.join(name));
        }
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        if self.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {:?}", path),
            ));
        }
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path) || self.denied.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        for file_path in self.files.keys().chain(self.denied.iter()) {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file() {
        let mut fs = MockFs::new();
        fs.add_file("/.dockerenv", "");

        assert!(fs.exists(Path::new("/.dockerenv")));
        assert_eq!(fs.read_to_string(Path::new("/.dockerenv")).unwrap(), "");
    }

    #[test]
    fn test_mock_fs_add_dmi_skips_empty() {
        let mut fs = MockFs::new();
        fs.add_dmi("QEMU", "", "SeaBIOS", "");

        assert!(fs.exists(Path::new("/sys/class/dmi/id/sys_vendor")));
        assert!(!fs.exists(Path::new("/sys/class/dmi/id/product_name")));
        let entries = fs.read_dir(Path::new("/sys/class/dmi/id")).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_mock_fs_interfaces() {
        let mut fs = MockFs::new();
        fs.add_interfaces(&["lo", "eth0", "vmbr0"]);

        let entries = fs.read_dir(Path::new("/sys/class/net")).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_mock_fs_unreadable() {
        let mut fs = MockFs::new();
        fs.add_unreadable("/proc/1/cgroup");

        assert!(fs.exists(Path::new("/proc/1/cgroup")));
        let err = fs.read_to_string(Path::new("/proc/1/cgroup")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_mock_fs_remove_file() {
        let mut fs = MockFs::new();
        fs.add_file("/run/.containerenv", "");
        fs.remove_file("/run/.containerenv");

        assert!(!fs.exists(Path::new("/run/.containerenv")));
        assert!(fs.exists(Path::new("/run")));
    }

    #[test]
    fn test_mock_fs_not_found() {
        let fs = MockFs::new();
        let result = fs.read_to_string(Path::new("/nonexistent"));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
