//! Periodic report assembly.
//!
//! [`ReportBuilder`] combines the environment label, host readings, public
//! addresses and interface throughput into one [`ReportRecord`].

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::classifier::Classify;
use crate::fmt::{format_gib_pair, format_mib_pair, format_rate, format_total, percent};
use crate::metrics::{MetricsError, MetricsProvider, NetworkTotals};
use crate::resolver::{AddressInfo, AddressResolver};

/// How long resolved addresses are reused.
pub const ADDRESS_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Status string of a live agent.
pub const STATUS_RUNNING: &str = "running";

/// Human-readable breakdown shown next to the percentages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDetail {
    pub memory: String,
    pub swap: String,
    pub disk: String,
    pub partitions_count: usize,
    pub cpu_info: String,
}

/// One `report_data` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub ip: String,
    pub ipv4: String,
    pub ipv6: Option<String>,
    pub status: String,
    #[serde(rename = "type")]
    pub environment: String,
    pub location: String,
    /// Whole days.
    pub uptime: u64,
    pub load: f64,
    pub net_in: String,
    pub net_out: String,
    pub traffic_in: String,
    pub traffic_out: String,
    pub cpu: u32,
    pub ram: u32,
    pub rom: u32,
    pub detail: ReportDetail,
    pub node_name: String,
}

/// Interface counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkCounterSample {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub taken_at: Instant,
}

impl NetworkCounterSample {
    pub fn new(totals: NetworkTotals, taken_at: Instant) -> Self {
        Self {
            bytes_sent: totals.bytes_sent,
            bytes_recv: totals.bytes_recv,
            taken_at,
        }
    }
}

/// Bytes per second in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Throughput {
    pub recv_per_sec: f64,
    pub sent_per_sec: f64,
}

/// Rate between two samples.
///
/// Zero for the first sample, for a non-positive time delta, and for a
/// direction whose counter went backwards.
pub fn throughput(previous: Option<&NetworkCounterSample>, current: &NetworkCounterSample) -> Throughput {
    let Some(prev) = previous else {
        return Throughput::default();
    };
    let Some(elapsed) = current.taken_at.checked_duration_since(prev.taken_at) else {
        return Throughput::default();
    };
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return Throughput::default();
    }

    let rate = |now: u64, before: u64| match now.checked_sub(before) {
        Some(delta) => delta as f64 / secs,
        None => {
            debug!("Interface counter regressed ({} -> {})", before, now);
            0.0
        }
    };
    Throughput {
        recv_per_sec: rate(current.bytes_recv, prev.bytes_recv),
        sent_per_sec: rate(current.bytes_sent, prev.bytes_sent),
    }
}

/// Anything that can produce a report on demand.
pub trait ReportSource: Send {
    fn build_report(&mut self) -> ReportRecord;

    /// Called when reporting stops for a while, so the next report does not
    /// average over the gap.
    fn reset_sample(&mut self) {}
}

fn or_default<T: Default>(what: &str, reading: Result<T, MetricsError>) -> T {
    reading.unwrap_or_else(|e| {
        warn!("Failed to read {}: {}", what, e);
        T::default()
    })
}

/// Builds reports from injected collaborators.
pub struct ReportBuilder {
    classifier: Box<dyn Classify>,
    metrics: Box<dyn MetricsProvider>,
    resolver: Arc<dyn AddressResolver>,
    node_name: String,
    location: String,
    address_refresh: Duration,
    addresses: Option<(AddressInfo, Instant)>,
    /// Background lookup in flight.
    refreshing: Option<Receiver<AddressInfo>>,
    previous: Option<NetworkCounterSample>,
}

impl ReportBuilder {
    pub fn new(
        classifier: Box<dyn Classify>,
        metrics: Box<dyn MetricsProvider>,
        resolver: Box<dyn AddressResolver>,
        node_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            metrics,
            resolver: Arc::from(resolver),
            node_name: node_name.into(),
            location: location.into(),
            address_refresh: ADDRESS_REFRESH_INTERVAL,
            addresses: None,
            refreshing: None,
            previous: None,
        }
    }

    pub fn with_address_refresh(mut self, interval: Duration) -> Self {
        self.address_refresh = interval;
        self
    }

    /// Cached addresses.
    ///
    /// Only the first lookup runs inline. Later refreshes run on a helper
    /// thread and the stale value is served until the result arrives.
    fn addresses(&mut self, now: Instant) -> AddressInfo {
        if let Some(rx) = &self.refreshing {
            match rx.try_recv() {
                Ok(info) => {
                    debug!("Addresses refreshed: {}", info.display);
                    self.addresses = Some((info, now));
                    self.refreshing = None;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    warn!("Address refresh thread exited without a result");
                    self.refreshing = None;
                }
            }
        }

        let Some((info, resolved_at)) = self.addresses.clone() else {
            let info = self.resolver.resolve();
            self.addresses = Some((info.clone(), now));
            return info;
        };
        if self.refreshing.is_none()
            && now.saturating_duration_since(resolved_at) >= self.address_refresh
        {
            self.spawn_refresh();
        }
        info
    }

    fn spawn_refresh(&mut self) {
        let resolver = Arc::clone(&self.resolver);
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("rbmon-resolve".to_string())
            .spawn(move || {
                let _ = tx.send(resolver.resolve());
            });
        match spawned {
            Ok(_) => self.refreshing = Some(rx),
            Err(e) => warn!("Failed to start address refresh: {}", e),
        }
    }

    fn network(&mut self, now: Instant) -> (Throughput, NetworkTotals) {
        match self.metrics.network_totals() {
            Ok(totals) => {
                let current = NetworkCounterSample::new(totals, now);
                let rates = throughput(self.previous.as_ref(), &current);
                self.previous = Some(current);
                (rates, totals)
            }
            Err(e) => {
                warn!("Failed to read network counters: {}", e);
                self.previous = None;
                (Throughput::default(), NetworkTotals::default())
            }
        }
    }

    /// Builds a report as of `now`. Never fails; missing readings become zero.
    pub fn build_at(&mut self, now: Instant) -> ReportRecord {
        let addresses = self.addresses(now);
        let environment = self.classifier.classify();

        let uptime = or_default("uptime", self.metrics.uptime_days());
        let load = or_default("load average", self.metrics.load_one());
        let (rates, totals) = self.network(now);
        let cpu = or_default("cpu usage", self.metrics.cpu_percent());
        let memory = or_default("memory", self.metrics.memory());
        let disk = or_default("disk usage", self.metrics.disk());
        let cpu_info = or_default("cpu info", self.metrics.cpu_info());

        let record = ReportRecord {
            ip: addresses.display,
            ipv4: addresses.ipv4,
            ipv6: addresses.ipv6,
            status: STATUS_RUNNING.to_string(),
            environment: environment.as_str().to_string(),
            location: self.location.clone(),
            uptime,
            load: (load * 100.0).round() / 100.0,
            net_in: format_rate(rates.recv_per_sec),
            net_out: format_rate(rates.sent_per_sec),
            traffic_in: format_total(totals.bytes_recv),
            traffic_out: format_total(totals.bytes_sent),
            cpu: cpu.clamp(0.0, 100.0).round() as u32,
            ram: percent(memory.used, memory.total) as u32,
            rom: percent(disk.used, disk.total) as u32,
            detail: ReportDetail {
                memory: format_mib_pair(memory.used, memory.total),
                swap: format_mib_pair(memory.swap_used, memory.swap_total),
                disk: format_gib_pair(disk.used, disk.total),
                partitions_count: disk.partitions,
                cpu_info: cpu_info.description(),
            },
            node_name: self.node_name.clone(),
        };
        debug!(
            "Report built: cpu={}% ram={}% rom={}% in={} out={}",
            record.cpu, record.ram, record.rom, record.net_in, record.net_out
        );
        record
    }

    pub fn build(&mut self) -> ReportRecord {
        self.build_at(Instant::now())
    }
}

impl ReportSource for ReportBuilder {
    fn build_report(&mut self) -> ReportRecord {
        self.build()
    }

    fn reset_sample(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::EnvironmentLabel;
    use crate::metrics::{CpuInfo, DiskReading, MemoryReading};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedLabel(EnvironmentLabel);

    impl Classify for FixedLabel {
        fn classify(&self) -> EnvironmentLabel {
            self.0.clone()
        }
    }

    struct CountingResolver(Arc<AtomicUsize>);

    /// Answers 203.0.113.7, then .8, .9 and so on.
    impl AddressResolver for CountingResolver {
        fn resolve(&self) -> AddressInfo {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            AddressInfo::new(format!("203.0.113.{}", 7 + n), None)
        }
    }

    /// Serves network totals from a shared queue (`None` is a failed read);
    /// other readings are fixed.
    struct ScriptedMetrics {
        totals: Arc<Mutex<Vec<Option<NetworkTotals>>>>,
        fail_memory: bool,
    }

    impl MetricsProvider for ScriptedMetrics {
        fn cpu_percent(&mut self) -> Result<f32, MetricsError> {
            Ok(12.6)
        }
        fn memory(&mut self) -> Result<MemoryReading, MetricsError> {
            if self.fail_memory {
                return Err(MetricsError::Unavailable("memory"));
            }
            Ok(MemoryReading {
                total: 4 * 1024 * 1024 * 1024,
                used: 1024 * 1024 * 1024,
                swap_total: 0,
                swap_used: 0,
            })
        }
        fn disk(&mut self) -> Result<DiskReading, MetricsError> {
            Ok(DiskReading {
                total: 100 * 1024 * 1024 * 1024,
                used: 42 * 1024 * 1024 * 1024,
                partitions: 2,
            })
        }
        fn uptime_days(&mut self) -> Result<u64, MetricsError> {
            Ok(3)
        }
        fn load_one(&mut self) -> Result<f64, MetricsError> {
            Ok(0.456)
        }
        fn network_totals(&mut self) -> Result<NetworkTotals, MetricsError> {
            let mut queue = self.totals.lock().unwrap();
            if queue.is_empty() {
                return Err(MetricsError::Unavailable("network"));
            }
            queue.remove(0).ok_or(MetricsError::Unavailable("network"))
        }
        fn cpu_info(&mut self) -> Result<CpuInfo, MetricsError> {
            Ok(CpuInfo {
                model: "QEMU Virtual CPU".into(),
                logical_cores: 2,
                physical_cores: 2,
                is_virtual: true,
            })
        }
    }

    fn builder(totals: Vec<NetworkTotals>, lookups: Arc<AtomicUsize>) -> ReportBuilder {
        scripted_builder(totals.into_iter().map(Some).collect(), lookups)
    }

    fn scripted_builder(
        totals: Vec<Option<NetworkTotals>>,
        lookups: Arc<AtomicUsize>,
    ) -> ReportBuilder {
        ReportBuilder::new(
            Box::new(FixedLabel(EnvironmentLabel::Kvm)),
            Box::new(ScriptedMetrics {
                totals: Arc::new(Mutex::new(totals)),
                fail_memory: false,
            }),
            Box::new(CountingResolver(lookups)),
            "node-1",
            "Frankfurt",
        )
    }

    fn totals(sent: u64, recv: u64) -> NetworkTotals {
        NetworkTotals {
            bytes_sent: sent,
            bytes_recv: recv,
        }
    }

    #[test]
    fn test_first_sample_is_zero() {
        let now = Instant::now();
        let current = NetworkCounterSample::new(totals(100, 200), now);
        assert_eq!(throughput(None, &current), Throughput::default());
    }

    #[test]
    fn test_throughput_one_second_apart() {
        let start = Instant::now();
        let prev = NetworkCounterSample::new(totals(1_000, 5_000), start);
        let current = NetworkCounterSample::new(totals(3_048, 6_536), start + Duration::from_secs(1));
        let rates = throughput(Some(&prev), &current);
        assert_eq!(rates.sent_per_sec, 2_048.0);
        assert_eq!(rates.recv_per_sec, 1_536.0);
    }

    #[test]
    fn test_throughput_zero_delta_and_regression() {
        let start = Instant::now();
        let prev = NetworkCounterSample::new(totals(1_000, 5_000), start);
        let same_instant = NetworkCounterSample::new(totals(2_000, 6_000), start);
        assert_eq!(throughput(Some(&prev), &same_instant), Throughput::default());

        let regressed = NetworkCounterSample::new(totals(10, 6_000), start + Duration::from_secs(2));
        let rates = throughput(Some(&prev), &regressed);
        assert_eq!(rates.sent_per_sec, 0.0);
        assert_eq!(rates.recv_per_sec, 500.0);
    }

    #[test]
    fn test_build_record() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let mut builder = builder(vec![totals(0, 0), totals(1024 * 1024, 2048)], lookups);
        let start = Instant::now();

        let first = builder.build_at(start);
        assert_eq!(first.net_in, "0B");
        assert_eq!(first.environment, "KVM");
        assert_eq!(first.ip, "ipv4:203.0.113.7");
        assert_eq!(first.status, "running");
        assert_eq!(first.cpu, 13);
        assert_eq!(first.ram, 25);
        assert_eq!(first.rom, 42);
        assert_eq!(first.load, 0.46);
        assert_eq!(first.detail.partitions_count, 2);
        assert_eq!(first.detail.cpu_info, "QEMU Virtual CPU 2 Virtual Core");
        assert_eq!(first.detail.memory, "1024.00 MiB / 4096.00 MiB");

        let second = builder.build_at(start + Duration::from_secs(1));
        assert_eq!(second.net_in, "2.0K");
        assert_eq!(second.net_out, "1.0M");
        assert_eq!(second.traffic_out, "1.0M");

        let json = serde_json::to_value(&second).unwrap();
        assert_eq!(json["type"], "KVM");
        assert_eq!(json["node_name"], "node-1");
        assert_eq!(json["location"], "Frankfurt");
        assert!(json["ipv6"].is_null());
    }

    #[test]
    fn test_reset_sample_after_gap() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let mut builder = builder(vec![totals(0, 0), totals(10_000, 10_000)], lookups);
        let start = Instant::now();

        builder.build_at(start);
        builder.reset_sample();
        let after_gap = builder.build_at(start + Duration::from_secs(1));
        assert_eq!(after_gap.net_in, "0B");
        assert_eq!(after_gap.net_out, "0B");
        assert_eq!(after_gap.traffic_in, "9.8K");
    }

    #[test]
    fn test_failed_counter_read_resets_sample() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let mut builder = scripted_builder(
            vec![Some(totals(0, 0)), None, Some(totals(50_000, 50_000))],
            lookups,
        );
        let start = Instant::now();

        builder.build_at(start);
        let failed = builder.build_at(start + Duration::from_secs(5));
        assert_eq!(failed.net_in, "0B");
        let after_gap = builder.build_at(start + Duration::from_secs(10));
        assert_eq!(after_gap.net_in, "0B");
        assert_eq!(after_gap.net_out, "0B");
        assert_eq!(after_gap.traffic_in, "48.8K");
    }

    fn wait_for_lookups(lookups: &AtomicUsize, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while lookups.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(lookups.load(Ordering::SeqCst), expected);
    }

    #[test]
    fn test_address_cache_refresh() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let mut builder = builder(vec![], lookups.clone()).with_address_refresh(Duration::from_secs(600));
        let start = Instant::now();

        builder.build_at(start);
        builder.build_at(start + Duration::from_secs(5));
        builder.build_at(start + Duration::from_secs(599));
        assert_eq!(lookups.load(Ordering::SeqCst), 1);

        // Expired: the stale value is served while the lookup runs elsewhere.
        let stale = builder.build_at(start + Duration::from_secs(600));
        assert_eq!(stale.ipv4, "203.0.113.7");
        wait_for_lookups(&lookups, 2);

        let refreshed = builder.build_at(start + Duration::from_secs(605));
        assert_eq!(refreshed.ipv4, "203.0.113.8");
        builder.build_at(start + Duration::from_secs(610));
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_readings_fall_back_to_zero() {
        let mut builder = ReportBuilder::new(
            Box::new(FixedLabel(EnvironmentLabel::Physical)),
            Box::new(ScriptedMetrics {
                totals: Arc::new(Mutex::new(Vec::new())),
                fail_memory: true,
            }),
            Box::new(CountingResolver(Arc::new(AtomicUsize::new(0)))),
            "node-1",
            "Local",
        );
        let record = builder.build();
        assert_eq!(record.environment, "DS");
        assert_eq!(record.ram, 0);
        assert_eq!(record.detail.memory, "0.00 MiB / 0.00 MiB");
        assert_eq!(record.net_in, "0B");
        assert_eq!(record.traffic_in, "0.0K");
    }
}
