//! Socket.IO adapter over the `rust_socketio` blocking client.
//!
//! Callbacks run on the client's own thread. They only decode and post
//! [`InboundEvent`]s; all state lives with the session.
//!
//! Every client gets a generation number. Replacing or abandoning a client
//! advances the generation first, so the close that `disconnect` fires on the
//! old client never reaches the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use rust_socketio::client::Client;
use rust_socketio::{ClientBuilder, Event, Payload, RawClient};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    EVENT_CONNECTION_REPLACED, EVENT_PROBE_REQUEST, EVENT_REGISTRATION_FAILED,
    EVENT_REGISTRATION_SUCCESS, InboundEvent, Transport, TransportError, decode_event,
};

/// First JSON argument of an event, or `Null`.
fn first_value(payload: Payload) -> Value {
    match payload {
        Payload::Text(mut values) if !values.is_empty() => values.swap_remove(0),
        _ => Value::Null,
    }
}

/// Generation a client was built for, checked against the live one.
#[derive(Clone)]
struct Generation {
    current: Arc<AtomicU64>,
    own: u64,
}

impl Generation {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.own
    }
}

pub struct SocketIoTransport {
    url: String,
    client: Option<Client>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    events: Sender<InboundEvent>,
}

impl SocketIoTransport {
    /// Creates the transport and the receiver the session drains.
    pub fn new(url: impl Into<String>) -> (Self, Receiver<InboundEvent>) {
        let (events, inbound) = mpsc::channel();
        let transport = Self {
            url: url.into(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        };
        (transport, inbound)
    }

    /// Starts a new generation; callbacks of earlier clients go quiet.
    fn retire_clients(&self) -> Generation {
        let own = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Generation {
            current: self.generation.clone(),
            own,
        }
    }

    fn builder(&self, generation: &Generation) -> ClientBuilder {
        let mut builder = ClientBuilder::new(self.url.as_str()).reconnect(false);

        for name in [
            EVENT_REGISTRATION_SUCCESS,
            EVENT_REGISTRATION_FAILED,
            EVENT_PROBE_REQUEST,
            EVENT_CONNECTION_REPLACED,
        ] {
            let tx = self.events.clone();
            let generation = generation.clone();
            builder = builder.on(name, move |payload: Payload, _socket: RawClient| {
                if !generation.is_current() {
                    return;
                }
                let value = first_value(payload);
                match decode_event(name, &value) {
                    Some(event) => {
                        let _ = tx.send(event);
                    }
                    None => debug!("Ignoring malformed {} payload: {}", name, value),
                }
            });
        }

        let tx = self.events.clone();
        let gen_error = generation.clone();
        builder = builder.on(Event::Error, move |payload: Payload, _socket: RawClient| {
            if !gen_error.is_current() {
                return;
            }
            let value = first_value(payload);
            let _ = tx.send(match value {
                Value::String(s) => InboundEvent::ServerError(s),
                other => InboundEvent::ServerError(other.to_string()),
            });
        });

        let connected = self.connected.clone();
        let gen_connect = generation.clone();
        builder = builder.on(Event::Connect, move |_payload: Payload, _socket: RawClient| {
            if gen_connect.is_current() {
                connected.store(true, Ordering::SeqCst);
            }
        });

        let connected = self.connected.clone();
        let tx = self.events.clone();
        let gen_close = generation.clone();
        builder.on(Event::Close, move |payload: Payload, _socket: RawClient| {
            let reason = match first_value(payload) {
                Value::Null => "closed".to_string(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            if !gen_close.is_current() {
                debug!("Close of retired client {}: {}", gen_close.own, reason);
                return;
            }
            connected.store(false, Ordering::SeqCst);
            let _ = tx.send(InboundEvent::Lost { reason });
        })
    }
}

impl Transport for SocketIoTransport {
    /// The handshake runs on a helper thread so it can be bounded. A client
    /// that connects after the deadline is disconnected by that thread.
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let generation = self.retire_clients();
        if let Some(old) = self.client.take() {
            let _ = old.disconnect();
        }
        self.connected.store(false, Ordering::SeqCst);

        let builder = self.builder(&generation);
        let (done_tx, done_rx) = mpsc::channel();
        thread::Builder::new()
            .name("rbmon-connect".to_string())
            .spawn(move || {
                let outcome = builder.connect();
                if let Err(mpsc::SendError(Ok(late))) = done_tx.send(outcome) {
                    let _ = late.disconnect();
                }
            })
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        match done_rx.recv_timeout(timeout) {
            Ok(Ok(client)) => {
                info!("Connected to {}", self.url);
                self.connected.store(true, Ordering::SeqCst);
                self.client = Some(client);
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
            Err(RecvTimeoutError::Timeout) => {
                // The helper thread disconnects a late client; keep it quiet.
                self.retire_clients();
                Err(TransportError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::Connect("connect thread exited".to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client.emit(event, payload).map_err(|e| TransportError::Emit {
            event: event.to_string(),
            reason: e.to_string(),
        })
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.retire_clients();
        self.connected.store(false, Ordering::SeqCst);
        match self.client.take() {
            Some(client) => client.disconnect().map_err(|e| {
                warn!("Disconnect from {} failed: {}", self.url, e);
                TransportError::Disconnect(e.to_string())
            }),
            None => Ok(()),
        }
    }
}
