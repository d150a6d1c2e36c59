//! Point-in-time host readings.
//!
//! [`MetricsProvider`] is the query interface the report builder consumes.
//! [`SysinfoMetrics`] implements it with the `sysinfo` crate plus a few direct
//! reads for CPU topology and the hypervisor flag.

use std::collections::HashSet;
use std::path::Path;
use std::thread;
use std::time::Duration;

use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

use crate::collector::traits::{CommandRunner, FileSystem, RealCommands, RealFs};
use crate::fmt::normalize_for_display;

/// Error reading a metric.
#[derive(Debug)]
pub enum MetricsError {
    /// The platform did not provide the reading.
    Unavailable(&'static str),
    /// I/O error reading a host file.
    Io(std::io::Error),
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::Unavailable(what) => write!(f, "{} unavailable", what),
            MetricsError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for MetricsError {}

impl From<std::io::Error> for MetricsError {
    fn from(e: std::io::Error) -> Self {
        MetricsError::Io(e)
    }
}

/// Physical memory and swap, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub total: u64,
    /// Total minus available, so reclaimable cache does not count as used.
    pub used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// Sum over all real partitions, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskReading {
    pub total: u64,
    pub used: u64,
    pub partitions: usize,
}

/// Cumulative interface counters since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkTotals {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// CPU model and topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuInfo {
    pub model: String,
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub is_virtual: bool,
}

impl CpuInfo {
    /// `"<model> <N> Virtual Core"` or `"<model> <N> Physical Core"`.
    ///
    /// Virtual CPUs are counted as logical cores; physical hosts as physical
    /// cores.
    pub fn description(&self) -> String {
        let model = if self.model.is_empty() {
            "Unknown CPU"
        } else {
            self.model.as_str()
        };
        if self.is_virtual {
            format!("{} {} Virtual Core", model, self.logical_cores.max(1))
        } else {
            let cores = if self.physical_cores > 0 {
                self.physical_cores
            } else {
                self.logical_cores
            };
            format!("{} {} Physical Core", model, cores.max(1))
        }
    }
}

/// Query interface for host readings.
pub trait MetricsProvider: Send {
    /// Global CPU utilization, 0 to 100.
    fn cpu_percent(&mut self) -> Result<f32, MetricsError>;
    fn memory(&mut self) -> Result<MemoryReading, MetricsError>;
    fn disk(&mut self) -> Result<DiskReading, MetricsError>;
    /// Whole days since boot.
    fn uptime_days(&mut self) -> Result<u64, MetricsError>;
    /// 1-minute load average.
    fn load_one(&mut self) -> Result<f64, MetricsError>;
    fn network_totals(&mut self) -> Result<NetworkTotals, MetricsError>;
    fn cpu_info(&mut self) -> Result<CpuInfo, MetricsError>;
}

/// Filesystem types that never back user data.
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "", "squashfs", "tmpfs", "devtmpfs", "proc", "sysfs", "devpts", "cgroup", "cgroup2",
    "pstore", "bpf", "autofs", "overlay",
];

/// Mount points of system pseudo trees.
const SYSTEM_MOUNTS: &[&str] = &[
    "/dev", "/proc", "/sys", "/run", "/boot/efi", "/run/lock", "/run/shm", "/run/user",
];

/// Returns true if a partition counts towards disk usage.
pub fn is_real_partition(file_system: &str, mount_point: &str) -> bool {
    !PSEUDO_FILESYSTEMS.contains(&file_system) && !SYSTEM_MOUNTS.contains(&mount_point)
}

/// Loopback traffic is local and excluded from the totals.
fn is_loopback(interface: &str) -> bool {
    interface == "lo" || interface == "lo0" || interface.starts_with("Loopback")
}

/// Load-average equivalent for hosts without one.
pub fn load_from_cpu(cpu_percent: f32, logical_cores: usize) -> f64 {
    let load = f64::from(cpu_percent) / 100.0 * logical_cores as f64;
    (load * 100.0).round() / 100.0
}

/// Fields of `/proc/cpuinfo` the CPU description needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuinfoSummary {
    pub model: Option<String>,
    pub physical_cores: usize,
    pub hypervisor: bool,
}

/// Parses `/proc/cpuinfo`.
///
/// Physical cores are the distinct `(physical id, core id)` pairs; the count is
/// zero when the kernel does not expose topology (many VMs and ARM hosts).
pub fn parse_cpuinfo(content: &str) -> CpuinfoSummary {
    let mut summary = CpuinfoSummary::default();
    let mut cores = HashSet::new();
    let mut physical_id = String::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "model name" if summary.model.is_none() => {
                summary.model = Some(normalize_for_display(value));
            }
            "physical id" => physical_id = value.to_string(),
            "core id" => {
                cores.insert((physical_id.clone(), value.to_string()));
            }
            "flags" if value.split_whitespace().any(|f| f == "hypervisor") => {
                summary.hypervisor = true;
            }
            _ => {}
        }
    }
    summary.physical_cores = cores.len();
    summary
}

/// [`MetricsProvider`] backed by `sysinfo`.
pub struct SysinfoMetrics<F: FileSystem = RealFs, C: CommandRunner = RealCommands> {
    sys: System,
    networks: Networks,
    fs: F,
    commands: C,
    cpu_primed: bool,
    cpu_info: Option<CpuInfo>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        Self::with_host(RealFs::new(), RealCommands::new())
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `/proc/cpuinfo` through `fs` and parses it.
pub fn read_cpuinfo<F: FileSystem>(fs: &F) -> Result<CpuinfoSummary, MetricsError> {
    let content = fs.read_to_string(Path::new("/proc/cpuinfo"))?;
    Ok(parse_cpuinfo(&content))
}

impl<F: FileSystem, C: CommandRunner> SysinfoMetrics<F, C> {
    /// Uses `fs` and `commands` for the CPU topology and hypervisor reads.
    pub fn with_host(fs: F, commands: C) -> Self {
        Self {
            sys: System::new(),
            networks: Networks::new_with_refreshed_list(),
            fs,
            commands,
            cpu_primed: false,
            cpu_info: None,
        }
    }

    fn refresh_cpu(&mut self) {
        self.sys.refresh_cpu();
        if !self.cpu_primed {
            // Usage is a delta between two refreshes.
            thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            self.sys.refresh_cpu();
            self.cpu_primed = true;
        }
    }

    fn read_cpu_info(&mut self) -> CpuInfo {
        self.refresh_cpu();
        let logical_cores = self.sys.cpus().len();
        let brand = self
            .sys
            .cpus()
            .first()
            .map(|cpu| normalize_for_display(cpu.brand()))
            .unwrap_or_default();

        let mut info = CpuInfo {
            model: brand,
            logical_cores,
            physical_cores: 0,
            is_virtual: false,
        };

        match read_cpuinfo(&self.fs) {
            Ok(summary) => {
                if let Some(model) = summary.model {
                    if info.model.is_empty() {
                        info.model = model;
                    }
                }
                info.physical_cores = summary.physical_cores;
                info.is_virtual = summary.hypervisor;
            }
            Err(e) => debug!("/proc/cpuinfo: {}", e),
        }

        if cfg!(target_os = "macos") {
            match self
                .commands
                .run("sysctl", &["-n", "machdep.cpu.features"], Duration::from_secs(3))
            {
                Ok(out) if out.success => {
                    info.is_virtual = out.stdout.split_whitespace().any(|f| f == "VMM");
                }
                Ok(_) => debug!("sysctl machdep.cpu.features failed"),
                Err(e) => debug!("sysctl unavailable: {}", e),
            }
        }

        info
    }
}

impl<F: FileSystem, C: CommandRunner> MetricsProvider for SysinfoMetrics<F, C> {
    fn cpu_percent(&mut self) -> Result<f32, MetricsError> {
        self.refresh_cpu();
        if self.sys.cpus().is_empty() {
            return Err(MetricsError::Unavailable("cpu usage"));
        }
        Ok(self.sys.global_cpu_info().cpu_usage().clamp(0.0, 100.0))
    }

    fn memory(&mut self) -> Result<MemoryReading, MetricsError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(MetricsError::Unavailable("memory"));
        }
        Ok(MemoryReading {
            total,
            used: total.saturating_sub(self.sys.available_memory()),
            swap_total: self.sys.total_swap(),
            swap_used: self.sys.used_swap(),
        })
    }

    fn disk(&mut self) -> Result<DiskReading, MetricsError> {
        let disks = Disks::new_with_refreshed_list();
        let mut reading = DiskReading::default();
        for disk in disks.list() {
            let file_system = disk.file_system().to_string_lossy();
            let mount_point = disk.mount_point().to_string_lossy();
            if !is_real_partition(&file_system, &mount_point) {
                continue;
            }
            let total = disk.total_space();
            reading.total += total;
            reading.used += total.saturating_sub(disk.available_space());
            reading.partitions += 1;
        }
        if reading.partitions == 0 {
            warn!("No real partitions found among {} mounts", disks.list().len());
        }
        Ok(reading)
    }

    fn uptime_days(&mut self) -> Result<u64, MetricsError> {
        Ok(System::uptime() / 86_400)
    }

    fn load_one(&mut self) -> Result<f64, MetricsError> {
        if cfg!(target_os = "windows") {
            let cpu = self.cpu_percent()?;
            return Ok(load_from_cpu(cpu, self.sys.cpus().len()));
        }
        let load = System::load_average().one;
        Ok((load * 100.0).round() / 100.0)
    }

    fn network_totals(&mut self) -> Result<NetworkTotals, MetricsError> {
        self.networks.refresh_list();
        self.networks.refresh();
        let mut totals = NetworkTotals::default();
        for (name, data) in self.networks.iter() {
            if is_loopback(name) {
                continue;
            }
            totals.bytes_recv += data.total_received();
            totals.bytes_sent += data.total_transmitted();
        }
        Ok(totals)
    }

    fn cpu_info(&mut self) -> Result<CpuInfo, MetricsError> {
        if let Some(info) = &self.cpu_info {
            return Ok(info.clone());
        }
        let info = self.read_cpu_info();
        debug!("CPU info: {}", info.description());
        self.cpu_info = Some(info.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockCommands, MockFs};

    const CPUINFO_PHYSICAL: &str = "\
processor\t: 0
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
core id\t\t: 0
flags\t\t: fpu vme de pse vmx
processor\t: 1
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
core id\t\t: 0
flags\t\t: fpu vme de pse vmx
processor\t: 2
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
core id\t\t: 1
flags\t\t: fpu vme de pse vmx
";

    #[test]
    fn test_parse_cpuinfo_topology() {
        let summary = parse_cpuinfo(CPUINFO_PHYSICAL);
        assert_eq!(
            summary.model.as_deref(),
            Some("Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz")
        );
        assert_eq!(summary.physical_cores, 2);
        assert!(!summary.hypervisor);
    }

    #[test]
    fn test_parse_cpuinfo_hypervisor_flag() {
        let summary = parse_cpuinfo("model name\t: QEMU Virtual CPU\nflags\t\t: fpu hypervisor\n");
        assert!(summary.hypervisor);
        assert_eq!(summary.physical_cores, 0);
    }

    #[test]
    fn test_cpu_description() {
        let vm = CpuInfo {
            model: "AMD EPYC 7B13".into(),
            logical_cores: 4,
            physical_cores: 2,
            is_virtual: true,
        };
        assert_eq!(vm.description(), "AMD EPYC 7B13 4 Virtual Core");

        let host = CpuInfo {
            model: "Intel(R) Core(TM) i7-9700".into(),
            logical_cores: 16,
            physical_cores: 8,
            is_virtual: false,
        };
        assert_eq!(host.description(), "Intel(R) Core(TM) i7-9700 8 Physical Core");

        let unknown = CpuInfo::default();
        assert_eq!(unknown.description(), "Unknown CPU 1 Physical Core");
    }

    #[test]
    fn test_real_partition_filter() {
        assert!(is_real_partition("ext4", "/"));
        assert!(is_real_partition("xfs", "/data"));
        assert!(!is_real_partition("tmpfs", "/tmp"));
        assert!(!is_real_partition("squashfs", "/snap/core/1"));
        assert!(!is_real_partition("vfat", "/boot/efi"));
        assert!(!is_real_partition("", "/mnt"));
    }

    #[test]
    fn test_load_from_cpu() {
        assert_eq!(load_from_cpu(50.0, 4), 2.0);
        assert_eq!(load_from_cpu(0.0, 8), 0.0);
    }

    #[test]
    fn test_loopback_excluded() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(!is_loopback("eth0"));
        assert!(!is_loopback("local0"));
    }

    #[test]
    fn test_read_cpuinfo_missing_file_is_io_error() {
        let fs = MockFs::new();
        assert!(matches!(read_cpuinfo(&fs), Err(MetricsError::Io(_))));

        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", "model name\t: QEMU Virtual CPU\n");
        let summary = read_cpuinfo(&fs).unwrap();
        assert_eq!(summary.model.as_deref(), Some("QEMU Virtual CPU"));
    }

    #[test]
    fn test_cpu_info_reads_cpuinfo_and_caches() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", "model name\t: QEMU Virtual CPU\nflags\t\t: fpu hypervisor\n");
        let mut metrics = SysinfoMetrics::with_host(fs, MockCommands::new());

        let first = metrics.cpu_info().unwrap();
        assert!(first.is_virtual || cfg!(target_os = "macos"));
        assert!(first.description().contains("Core"));
        assert_eq!(metrics.cpu_info().unwrap(), first);
    }
}
