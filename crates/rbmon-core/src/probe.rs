//! TCP reachability probes requested by the collector.
//!
//! A probe prefers the external `tcping` tool when it is installed (never on
//! Windows) and falls back to a native connect when the tool cannot be run.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collector::traits::{CommandRunner, FileSystem, RealCommands, RealFs};

/// Overall budget of a native probe, resolution included.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);
/// Budget of one `tcping` run.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(15);
/// Probes slower than this are reported as failures.
pub const LATENCY_CEILING_MS: f64 = 500.0;

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub host: String,
    pub port: i64,
    /// Round trip of the TCP handshake, 0.01 ms resolution.
    #[serde(rename = "latency")]
    pub latency_ms: Option<f64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn succeeded(host: &str, port: i64, latency_ms: f64) -> Self {
        Self {
            host: host.to_string(),
            port,
            latency_ms: Some(round_latency(latency_ms)),
            success: true,
            error: None,
        }
    }

    pub fn failed(host: &str, port: i64, error: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            port,
            latency_ms: None,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Applies the latency ceiling.
    fn checked(host: &str, port: i64, latency_ms: f64) -> Self {
        if latency_ms > LATENCY_CEILING_MS {
            info!("Probe {}:{} too slow: {:.2}ms", host, port, latency_ms);
            Self::failed(host, port, "High latency")
        } else {
            Self::succeeded(host, port, latency_ms)
        }
    }
}

fn round_latency(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

/// Resolves `host` on a helper thread and gives up after `timeout`.
///
/// A lookup that overruns keeps its thread until the resolver returns; the
/// result is discarded.
pub fn resolve_within(host: &str, port: u16, timeout: Duration) -> Result<Vec<SocketAddr>, String> {
    let (tx, rx) = mpsc::channel();
    let target = host.to_string();
    thread::Builder::new()
        .name("rbmon-dns".to_string())
        .spawn(move || {
            let resolved: io::Result<Vec<SocketAddr>> = (target.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect());
            let _ = tx.send(resolved);
        })
        .map_err(|e| format!("DNS error: {}", e))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(addrs)) => Ok(addrs),
        Ok(Err(e)) => Err(format!("DNS error: {}", e)),
        Err(RecvTimeoutError::Timeout) => Err("DNS timeout".to_string()),
        Err(RecvTimeoutError::Disconnected) => Err("DNS error: resolver exited".to_string()),
    }
}

/// Executes a probe. Never fails: every problem becomes a failed result.
pub trait ProbeExecutor: Send {
    fn probe(&self, host: &str, port: i64) -> ProbeResult;
}

/// Checks host and port before any network activity.
pub fn validate(host: &str, port: i64) -> Result<u16, ProbeResult> {
    if host.trim().is_empty() {
        return Err(ProbeResult::failed(host, port, "Invalid parameters"));
    }
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ProbeResult::failed(host, port, format!("Invalid port: {}", port))),
    }
}

/// Result of interpreting `tcping --report` output.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolVerdict {
    Latency(f64),
    /// Success without a parseable latency.
    ReachableNoLatency,
    Failed(&'static str),
}

/// First number immediately followed by `ms`.
fn first_ms_value(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut search = 0;
    while let Some(pos) = text[search..].find("ms") {
        let end = search + pos;
        let mut start = end;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        if start < end {
            if let Ok(value) = text[start..end].parse::<f64>() {
                return Some(value);
            }
        }
        search = end + 2;
    }
    None
}

/// Interprets `tcping` output from a successful run.
pub fn parse_tool_output(output: &str) -> ToolVerdict {
    let lower = output.to_lowercase();
    if lower.contains("connected") {
        match first_ms_value(&lower) {
            Some(ms) if ms > 0.0 => ToolVerdict::Latency(ms),
            _ => {
                if lower.contains("0.00ms") && (output.contains("0     |   1") || lower.contains("failed")) {
                    ToolVerdict::Failed("Zero latency failure")
                } else {
                    ToolVerdict::ReachableNoLatency
                }
            }
        }
    } else if ["open", "reachable", "success"].iter().any(|s| lower.contains(s)) {
        ToolVerdict::ReachableNoLatency
    } else {
        ToolVerdict::Failed("No success indicators")
    }
}

/// Where the external tool comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// Search `PATH` and the usual install directories.
    Search,
    Path(PathBuf),
    /// Always probe natively.
    Native,
}

/// Probe executor with `tcping` and native connect.
pub struct TcpProbe<F: FileSystem = RealFs, C: CommandRunner = RealCommands> {
    fs: F,
    commands: C,
    tool: ToolChoice,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new() -> Self {
        Self::with_host(RealFs::new(), RealCommands::new())
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FileSystem, C: CommandRunner> TcpProbe<F, C> {
    pub fn with_host(fs: F, commands: C) -> Self {
        let tool = if cfg!(windows) {
            ToolChoice::Native
        } else {
            ToolChoice::Search
        };
        Self {
            fs,
            commands,
            tool,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_tool(mut self, tool: ToolChoice) -> Self {
        self.tool = tool;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).map(|dir| dir.join("tcping")).collect())
            .unwrap_or_default();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(Path::new(&home).join(".local/bin/tcping"));
        }
        for dir in ["/usr/local/bin", "/usr/bin", "/opt/homebrew/bin"] {
            paths.push(Path::new(dir).join("tcping"));
        }
        paths
    }

    fn locate_tool(&self) -> Option<PathBuf> {
        match &self.tool {
            ToolChoice::Native => None,
            ToolChoice::Path(path) => Some(path.clone()),
            ToolChoice::Search => self.candidate_paths().into_iter().find(|p| self.fs.exists(p)),
        }
    }

    /// Runs the tool; `None` means it could not be run and native should be used.
    /// A run that overruns its budget is a failed probe, not a fallback.
    fn probe_with_tool(&self, tool: &Path, host: &str, port: u16) -> Option<ProbeResult> {
        let program = tool.to_string_lossy();
        let port_arg = port.to_string();
        let args = [host, "-p", port_arg.as_str(), "-c", "1", "--report"];
        debug!("Executing {} {}", program, args.join(" "));

        let output = match self.commands.run(&program, &args, TOOL_TIMEOUT) {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!("tcping timed out probing {}:{}", host, port);
                return Some(ProbeResult::failed(host, i64::from(port), "Socket timeout"));
            }
            Err(e) => {
                warn!("tcping could not run ({}), probing {}:{} natively", e, host, port);
                return None;
            }
        };

        let port = i64::from(port);
        if !output.success {
            let reason = output
                .stdout
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| "tcping failed".to_string());
            return Some(ProbeResult::failed(host, port, reason));
        }

        Some(match parse_tool_output(&output.stdout) {
            ToolVerdict::Latency(ms) => ProbeResult::checked(host, port, ms),
            ToolVerdict::ReachableNoLatency => ProbeResult::succeeded(host, port, 1.0),
            ToolVerdict::Failed(reason) => ProbeResult::failed(host, port, reason),
        })
    }

    /// Connects with the standard library, trying each resolved address until
    /// the budget is spent. Name resolution counts against the same budget.
    pub fn probe_native(&self, host: &str, port: u16) -> ProbeResult {
        let started = Instant::now();
        let port_i = i64::from(port);
        let addrs = match resolve_within(host, port, self.connect_timeout) {
            Ok(addrs) => addrs,
            Err(reason) => return ProbeResult::failed(host, port_i, reason),
        };
        if addrs.is_empty() {
            return ProbeResult::failed(host, port_i, "DNS error: no addresses");
        }

        let mut last_error = String::from("Socket timeout");
        for addr in addrs {
            let remaining = self.connect_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                last_error = "Socket timeout".to_string();
                break;
            }
            let attempt = Instant::now();
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(_) => {
                    let ms = attempt.elapsed().as_secs_f64() * 1000.0;
                    return ProbeResult::checked(host, port_i, ms);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    last_error = "Socket timeout".to_string();
                }
                Err(e) => {
                    debug!("connect {} failed: {}", addr, e);
                    last_error = format!("Connection error: {}", e);
                }
            }
        }
        ProbeResult::failed(host, port_i, last_error)
    }
}

impl<F: FileSystem, C: CommandRunner> ProbeExecutor for TcpProbe<F, C> {
    fn probe(&self, host: &str, port: i64) -> ProbeResult {
        let port = match validate(host, port) {
            Ok(port) => port,
            Err(result) => return result,
        };

        let result = self
            .locate_tool()
            .and_then(|tool| self.probe_with_tool(&tool, host, port))
            .unwrap_or_else(|| self.probe_native(host, port));

        match (&result.latency_ms, &result.error) {
            (Some(ms), _) => info!("Probe {}:{} ok in {:.2}ms", host, port, ms),
            (None, Some(e)) => info!("Probe {}:{} failed: {}", host, port, e),
            (None, None) => {}
        }
        result
    }
}
