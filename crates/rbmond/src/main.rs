//! rbmond - host monitoring agent.
//!
//! Connects to the collector, registers the node, and sends periodic reports
//! and heartbeats. Answers TCP probe requests from the collector.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use rbmon_core::classifier::{Classifier, Classify};
use rbmon_core::config::{
    AgentConfig, DEFAULT_LOCATION, DEFAULT_MAX_RECONNECTS, DEFAULT_SERVER_URL, SessionConfig,
    default_node_name,
};
use rbmon_core::metrics::SysinfoMetrics;
use rbmon_core::probe::TcpProbe;
use rbmon_core::report::ReportBuilder;
use rbmon_core::resolver::HttpAddressResolver;
use rbmon_core::session::Session;
use rbmon_core::transport::SocketIoTransport;

/// Host monitoring agent.
#[derive(Parser)]
#[command(name = "rbmond", about = "Host monitoring agent", version)]
struct Args {
    /// Collector URL.
    #[arg(long, env = "RBMON_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// Node name reported to the collector. Defaults to the host name.
    #[arg(long, env = "RBMON_NODE_NAME")]
    node_name: Option<String>,

    /// Free-form location label.
    #[arg(long, env = "RBMON_LOCATION", default_value = DEFAULT_LOCATION)]
    location: String,

    /// Report interval in seconds.
    #[arg(long, default_value = "5")]
    report_interval: u64,

    /// Heartbeat interval in seconds.
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,

    /// Delay between reconnect attempts in seconds.
    #[arg(long, default_value = "2")]
    reconnect_interval: u64,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Seconds to wait for registration confirmation before resending.
    #[arg(long, default_value = "10")]
    registration_timeout: u64,

    /// Consecutive failed connects before giving up.
    #[arg(long, env = "RBMON_MAX_RECONNECTS", default_value_t = DEFAULT_MAX_RECONNECTS)]
    max_reconnects: u32,

    /// Collect one report, print it as JSON and exit without connecting.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn config(&self) -> AgentConfig {
        let node_name = self
            .node_name
            .clone()
            .unwrap_or_else(default_node_name);
        let session = SessionConfig {
            report_interval: Duration::from_secs(self.report_interval),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            reconnect_interval: Duration::from_secs(self.reconnect_interval),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            registration_timeout: Duration::from_secs(self.registration_timeout),
            max_reconnects: self.max_reconnects,
            ..SessionConfig::default()
        };
        AgentConfig::new(self.server_url.trim(), node_name)
            .with_location(self.location.clone())
            .with_session(session)
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("rbmond={}", level).parse().unwrap())
        .add_directive(format!("rbmon_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn report_builder(config: &AgentConfig, classifier: Box<dyn Classify>) -> ReportBuilder {
    ReportBuilder::new(
        classifier,
        Box::new(SysinfoMetrics::new()),
        Box::new(HttpAddressResolver::new()),
        config.node_name.clone(),
        config.location.clone(),
    )
}

/// Prints the classification and one report, then exits.
fn run_once(config: &AgentConfig) -> ExitCode {
    let classifier = Classifier::system();
    let label = classifier.classify();
    println!("environment: {}", label);

    let mut builder = report_builder(config, Box::new(classifier));
    let record = builder.build();
    match serde_json::to_string_pretty(&record) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to encode report: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = args.config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::from(2);
    }

    if args.once {
        return run_once(&config);
    }

    info!(
        "rbmond {} starting: node={}, location={}, server={}",
        rbmon_core::VERSION,
        config.node_name,
        config.location,
        config.server_url
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let (transport, inbound) = SocketIoTransport::new(config.server_url.clone());
    let reports = report_builder(&config, Box::new(Classifier::system()));
    let mut session = Session::new(
        config.session.clone(),
        config.node_name.clone(),
        transport,
        inbound,
        Box::new(reports),
        Box::new(TcpProbe::new()),
    );

    match session.run(&running) {
        Ok(()) => {
            info!("rbmond stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("rbmond stopping: {}", e);
            ExitCode::FAILURE
        }
    }
}
