//! Session loop: connection upkeep, registration, heartbeats, reports and
//! probe replies.
//!
//! One thread owns all session state. Inbound traffic arrives through a
//! channel and is drained at the top of every [`Session::tick`]; lifecycle
//! changes go through [`state::transition`] and its effects are carried out
//! here.

pub mod state;
pub mod timer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::probe::ProbeExecutor;
use crate::report::ReportSource;
use crate::transport::{
    EVENT_HEARTBEAT, EVENT_PROBE_RESULT, EVENT_REGISTER, EVENT_REPORT, HeartbeatPayload,
    InboundEvent, ProbeReply, ProbeRequest, RegisterPayload, Transport, now_millis,
};

pub use state::{Effect, ReconnectCounter, SessionEvent, SessionState, Transition, transition};
pub use timer::IntervalTimer;

/// Fatal session failure.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    /// Too many consecutive failed connects.
    ReconnectCeiling { attempts: u32 },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::ReconnectCeiling { attempts } => {
                write!(f, "giving up after {} failed connection attempts", attempts)
            }
        }
    }
}

impl std::error::Error for SessionError {}

fn to_payload<T: Serialize>(event: &str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Failed to encode {} payload: {}", event, e);
            None
        }
    }
}

/// Sleeps in 100 ms slices while `running` stays set.
pub fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

pub struct Session<T: Transport> {
    config: SessionConfig,
    node_name: String,
    version: String,
    transport: T,
    inbound: Receiver<InboundEvent>,
    reports: Box<dyn ReportSource>,
    prober: Box<dyn ProbeExecutor>,

    state: SessionState,
    reconnects: ReconnectCounter,
    reconnect_timer: IntervalTimer,
    report_timer: IntervalTimer,
    heartbeat_timer: IntervalTimer,
    registration_sent_at: Option<Instant>,
    unstable: bool,
    reports_sent: u64,
}

impl<T: Transport> Session<T> {
    pub fn new(
        config: SessionConfig,
        node_name: impl Into<String>,
        transport: T,
        inbound: Receiver<InboundEvent>,
        reports: Box<dyn ReportSource>,
        prober: Box<dyn ProbeExecutor>,
    ) -> Self {
        let now = Instant::now();
        Self {
            reconnects: ReconnectCounter::new(config.max_reconnects),
            reconnect_timer: IntervalTimer::due_now(config.reconnect_interval, now),
            report_timer: IntervalTimer::new(config.report_interval),
            heartbeat_timer: IntervalTimer::new(config.heartbeat_interval),
            config,
            node_name: node_name.into(),
            version: crate::VERSION.to_string(),
            transport,
            inbound,
            reports,
            prober,
            state: SessionState::Disconnected,
            registration_sent_at: None,
            unstable: false,
            reports_sent: 0,
        }
    }

    /// Version announced in heartbeats.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True after a send exhausted its retries, until the next successful send.
    pub fn is_unstable(&self) -> bool {
        self.unstable
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.count()
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs every action that is due at `now`.
    pub fn tick(&mut self, now: Instant) -> Result<(), SessionError> {
        while let Ok(event) = self.inbound.try_recv() {
            self.handle_inbound(event, now)?;
        }

        if self.state.is_connected() && !self.transport.is_connected() {
            warn!("Transport reports disconnected");
            self.apply(SessionEvent::TransportLost, now)?;
        }

        if self.state == SessionState::Disconnected && self.reconnect_timer.is_due(now) {
            self.try_connect(now)?;
        }

        if self.state == SessionState::Connected {
            if let Some(sent_at) = self.registration_sent_at {
                if now.saturating_duration_since(sent_at) >= self.config.registration_timeout {
                    info!(
                        "Registration unconfirmed after {:?}, retrying",
                        now.saturating_duration_since(sent_at)
                    );
                    self.apply(SessionEvent::RegistrationTimedOut, now)?;
                }
            }
        }

        if self.state.is_connected() && self.heartbeat_timer.is_due(now) {
            self.send_heartbeat();
            self.heartbeat_timer.restart(now);
        }

        if self.state.is_registered() && self.report_timer.is_due(now) {
            self.send_report();
            self.report_timer.restart(now);
        }

        Ok(())
    }

    /// Ticks until `running` is cleared or the session fails, then shuts down.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), SessionError> {
        info!("Session started for node {}", self.node_name);
        let result = loop {
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = self.tick(Instant::now()) {
                error!("{}", e);
                break Err(e);
            }
            let pause = if self.state.is_registered() {
                self.config.registered_sleep
            } else {
                self.config.idle_sleep
            };
            sleep_while_running(pause, running);
        };
        self.shutdown();
        result
    }

    /// Disconnects and waits the grace period.
    pub fn shutdown(&mut self) {
        info!("Shutting down session");
        if let Err(e) = self.transport.disconnect() {
            warn!("Disconnect failed: {}", e);
        }
        self.state = SessionState::Disconnected;
        if !self.config.shutdown_grace.is_zero() {
            thread::sleep(self.config.shutdown_grace);
        }
    }

    fn try_connect(&mut self, now: Instant) -> Result<(), SessionError> {
        self.apply(SessionEvent::ConnectStarted, now)?;
        info!(
            "Connecting (attempt {}/{})",
            self.reconnects.count() + 1,
            self.reconnects.ceiling()
        );
        let started = Instant::now();
        let outcome = self.transport.connect(self.config.connect_timeout);
        self.reconnect_timer.restart(now);
        match outcome {
            Ok(()) => {
                // Anything queued while connecting came from the previous
                // client; its close must not take down the new connection.
                let queued: Vec<InboundEvent> = self.inbound.try_iter().collect();
                self.apply(SessionEvent::ConnectSucceeded, now)?;
                for event in queued {
                    match event {
                        InboundEvent::Lost { reason } => {
                            debug!("Discarding close of the replaced connection: {}", reason)
                        }
                        other => self.handle_inbound(other, now)?,
                    }
                }
                Ok(())
            }
            Err(e) => {
                warn!("Connection failed after {:?}: {}", started.elapsed(), e);
                self.apply(SessionEvent::ConnectFailed, now)
            }
        }
    }

    fn apply(&mut self, event: SessionEvent, now: Instant) -> Result<(), SessionError> {
        let Transition {
            next,
            effects,
            expected,
        } = transition(self.state, event);
        if !expected {
            debug!("Ignoring {:?} while {:?}", event, self.state);
            return Ok(());
        }
        if next != self.state {
            info!("Session {:?} -> {:?} on {:?}", self.state, next, event);
        }
        self.state = next;

        for effect in effects {
            match effect {
                Effect::ResetReconnects => self.reconnects.reset(),
                Effect::SendRegistration => self.send_registration(),
                Effect::ResetRegistrationClock => self.registration_sent_at = Some(now),
                Effect::ArmTimers => {
                    self.report_timer.arm_after(now, self.config.first_report_delay);
                    self.heartbeat_timer.arm_after(now, self.config.first_heartbeat_delay);
                }
                Effect::CountFailure => {
                    if self.reconnects.record_failure() {
                        return Err(SessionError::ReconnectCeiling {
                            attempts: self.reconnects.count(),
                        });
                    }
                    debug!(
                        "{} of {} reconnect attempts used",
                        self.reconnects.count(),
                        self.reconnects.ceiling()
                    );
                }
                Effect::MarkConfirmed => info!("Node {} registered", self.node_name),
                Effect::ClearRegistration => {
                    self.registration_sent_at = None;
                    self.report_timer.disarm();
                    self.heartbeat_timer.disarm();
                    self.reports.reset_sample();
                }
            }
        }
        Ok(())
    }

    fn handle_inbound(&mut self, event: InboundEvent, now: Instant) -> Result<(), SessionError> {
        match event {
            InboundEvent::Lost { reason } => {
                warn!("Connection lost: {}", reason);
                self.apply(SessionEvent::TransportLost, now)
            }
            InboundEvent::RegistrationConfirmed { socket_id } => {
                debug!("Registration confirmed (socket {:?})", socket_id);
                self.apply(SessionEvent::RegistrationConfirmed, now)
            }
            InboundEvent::RegistrationRejected { error } => {
                warn!("Registration rejected: {}", error);
                self.apply(SessionEvent::RegistrationRejected, now)
            }
            InboundEvent::ProbeRequested(request) => {
                self.handle_probe(request);
                Ok(())
            }
            InboundEvent::ConnectionReplaced {
                message,
                new_socket_id,
            } => {
                warn!("Connection replaced by {:?}: {}", new_socket_id, message);
                Ok(())
            }
            InboundEvent::ServerError(e) => {
                warn!("Server error: {}", e);
                Ok(())
            }
        }
    }

    /// Emits with a fixed number of attempts. Exhaustion marks the session
    /// unstable but leaves the connection alone.
    fn send_with_retry(&mut self, event: &str, payload: Value, delay: Duration) -> bool {
        let attempts = self.config.send_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.transport.is_connected() {
                debug!("Transport down, dropping {}", event);
                self.unstable = true;
                return false;
            }
            match self.transport.emit(event, payload.clone()) {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Sent {} on attempt {}", event, attempt);
                    }
                    self.unstable = false;
                    return true;
                }
                Err(e) => {
                    warn!("Failed to send {} (attempt {}/{}): {}", event, attempt, attempts, e);
                    if attempt < attempts && !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
        self.unstable = true;
        false
    }

    fn send_registration(&mut self) {
        let payload = RegisterPayload {
            node_name: self.node_name.clone(),
        };
        if let Some(value) = to_payload(EVENT_REGISTER, &payload) {
            match self.transport.emit(EVENT_REGISTER, value) {
                Ok(()) => info!("Registration sent for {}", self.node_name),
                Err(e) => warn!("Failed to send registration: {}", e),
            }
        }
    }

    fn send_heartbeat(&mut self) {
        let payload = HeartbeatPayload {
            node_name: self.node_name.clone(),
            timestamp: now_millis(),
            version: self.version.clone(),
        };
        if let Some(value) = to_payload(EVENT_HEARTBEAT, &payload) {
            if self.send_with_retry(EVENT_HEARTBEAT, value, self.config.report_retry_delay) {
                debug!("Heartbeat sent");
            }
        }
    }

    fn send_report(&mut self) {
        let record = self.reports.build_report();
        let Some(value) = to_payload(EVENT_REPORT, &record) else {
            return;
        };
        if self.send_with_retry(EVENT_REPORT, value, self.config.report_retry_delay) {
            self.reports_sent += 1;
            info!(
                "Report sent: cpu={}% ram={}% rom={}%",
                record.cpu, record.ram, record.rom
            );
        } else {
            warn!("Report dropped");
        }
    }

    fn handle_probe(&mut self, request: ProbeRequest) {
        if !self.state.is_connected() {
            warn!(
                "Ignoring probe of {}:{} while disconnected",
                request.host, request.port
            );
            return;
        }
        info!(
            "Probe requested: {}:{} (request {})",
            request.host, request.port, request.request_id
        );

        let started = Instant::now();
        let result = self.prober.probe(&request.host, request.port);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let reply = ProbeReply {
            result,
            request_id: request.request_id,
            node_name: self.node_name.clone(),
            processing_time_ms: (elapsed_ms * 10.0).round() / 10.0,
            timestamp: now_millis(),
        };
        let Some(value) = to_payload(EVENT_PROBE_RESULT, &reply) else {
            return;
        };
        if !self.send_with_retry(EVENT_PROBE_RESULT, value, self.config.probe_retry_delay) {
            warn!(
                "Probe reply for {}:{} dropped after {:.1}ms",
                request.host, request.port, elapsed_ms
            );
        }
    }
}
