//! Reconnecting publish/subscribe client.
//!
//! A [`ChannelClient`] owns one background task that holds the live
//! connection. Outbound events are queued and written in publish order;
//! inbound events are dispatched to handlers registered by event name.
//! Membership events (`join:*`, `subscribe:bus`) are remembered and
//! replayed after every reconnect, since the broker forgets them when a
//! connection drops.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{Connection, Transport};
use crate::error::ChannelError;
use crate::models::events::{ClientEvent, ServerEvent};

const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after a failure before giving up.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from
    /// `initial_delay`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1 << exponent);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal: retries exhausted or the client was closed.
    Disconnected,
}

pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<String, Vec<Handler>>>>;

pub struct ChannelClient {
    outbound: mpsc::Sender<ClientEvent>,
    handlers: HandlerMap,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChannelClient {
    /// Starts connecting in the background and returns immediately.
    pub fn open(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));

        let worker = Worker {
            transport,
            policy,
            outbound: outbound_rx,
            handlers: handlers.clone(),
            status: status_tx,
            shutdown: shutdown_rx,
            memberships: Vec::new(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            outbound: outbound_tx,
            handlers,
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Queues an event for the broker. Fire-and-forget: events queued while
    /// the connection is down may be lost.
    pub fn publish(&self, event: ClientEvent) -> Result<(), ChannelError> {
        if self.status() == ConnectionStatus::Disconnected {
            return Err(ChannelError::Closed);
        }
        match self.outbound.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event = ?event, "Outbound queue full, dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    pub fn subscribe<F>(&self, event_name: &str, handler: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stops any pending reconnect and closes the live connection.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Channel task ended abnormally: {}", e);
        }
    }
}

enum Step {
    Inbound(Option<Result<String, ChannelError>>),
    Outbound(Option<ClientEvent>),
    Shutdown,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

struct Worker {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    outbound: mpsc::Receiver<ClientEvent>,
    handlers: HandlerMap,
    status: watch::Sender<ConnectionStatus>,
    shutdown: watch::Receiver<bool>,
    memberships: Vec<ClientEvent>,
}

impl Worker {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok(conn) => {
                    attempt = 0;
                    self.set_status(ConnectionStatus::Connected);
                    info!("Event channel connected");
                    if let SessionEnd::Shutdown = self.session(conn).await {
                        break;
                    }
                    warn!("Event channel connection lost");
                }
                Err(e) => warn!(attempt, error = %e, "Event channel connect failed"),
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                error!(attempts = self.policy.max_attempts, "Reconnect attempts exhausted");
                break;
            }
            self.set_status(ConnectionStatus::Reconnecting { attempt });

            let delay = self.policy.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        info!("Event channel disconnected");
    }

    async fn session(&mut self, mut conn: Box<dyn Connection>) -> SessionEnd {
        for event in self.memberships.clone() {
            if !self.write(conn.as_mut(), &event).await {
                return SessionEnd::Lost;
            }
        }

        loop {
            let step = tokio::select! {
                frame = conn.recv() => Step::Inbound(frame),
                event = self.outbound.recv() => Step::Outbound(event),
                _ = self.shutdown.changed() => Step::Shutdown,
            };

            match step {
                Step::Inbound(Some(Ok(frame))) => self.dispatch(&frame),
                Step::Inbound(Some(Err(e))) => {
                    warn!(error = %e, "Event channel read failed");
                    return SessionEnd::Lost;
                }
                Step::Inbound(None) => return SessionEnd::Lost,
                Step::Outbound(Some(event)) => {
                    self.remember(&event);
                    if !self.write(conn.as_mut(), &event).await {
                        return SessionEnd::Lost;
                    }
                }
                Step::Outbound(None) | Step::Shutdown => return SessionEnd::Shutdown,
            }
        }
    }

    async fn write(&self, conn: &mut dyn Connection, event: &ClientEvent) -> bool {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode client event");
                return true;
            }
        };
        match conn.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Event channel write failed");
                false
            }
        }
    }

    fn remember(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::JoinRole(_) => {
                self.memberships.retain(|m| !matches!(m, ClientEvent::JoinRole(_)));
                self.memberships.push(event.clone());
            }
            ClientEvent::UnsubscribeBus(bus_id) => {
                self.memberships
                    .retain(|m| !matches!(m, ClientEvent::SubscribeBus(b) if b == bus_id));
            }
            _ if event.is_membership() => {
                if !self.memberships.contains(event) {
                    self.memberships.push(event.clone());
                }
            }
            _ => {}
        }
    }

    fn dispatch(&self, frame: &str) {
        let event = match ServerEvent::from_frame(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed server frame");
                return;
            }
        };
        let handlers: Vec<Handler> = {
            let map = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            map.get(event.name()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(&event);
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}
