use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::protocol::{self, Frame};
use super::transport::{Connector, SocketLink};
use crate::auth::AuthState;
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::models::{Ack, ClientEvent, ServerEvent};
use crate::utils::{ScopeGuard, TaskGuard};

/// What subscribers of the connection manager observe
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    /// Transport lost; a reconnect may follow
    Disconnected,
    Reconnecting { attempt: u32 },
    /// Connection torn down on purpose (logout, teardown)
    Closed,
    Server(ServerEvent),
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub ack_timeout: Duration,
    pub event_buffer: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.socket_endpoint(),
            reconnection_attempts: config.reconnection_attempts,
            reconnection_delay: config.reconnection_delay(),
            ack_timeout: config.ack_timeout(),
            event_buffer: config.event_buffer,
        }
    }
}

/// Outgoing half of the live link. `epoch` changes whenever a connection is
/// opened or closed so a superseded task can no longer touch the link.
#[derive(Default)]
struct LinkState {
    epoch: u64,
    outgoing: Option<tokio::sync::mpsc::UnboundedSender<String>>,
}

struct ActiveConnection {
    user_id: String,
    task: TaskGuard,
}

struct ConnectionInner {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    connected_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    link: Mutex<LinkState>,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_ack: AtomicU64,
    active: Mutex<Option<ActiveConnection>>,
}

/// Owns the single realtime connection of an authenticated session
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
    _teardown: Arc<ScopeGuard<Box<dyn FnOnce() + Send + Sync>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        let (connected_tx, _) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(settings.event_buffer.max(1));
        let inner = Arc::new(ConnectionInner {
            settings,
            connector,
            connected_tx,
            events_tx,
            link: Mutex::new(LinkState::default()),
            pending_acks: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(0),
            active: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let teardown: Box<dyn FnOnce() + Send + Sync> = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.close();
            }
        });

        Self {
            inner,
            _teardown: Arc::new(ScopeGuard::new(teardown)),
        }
    }

    /// Follow the session: connect while authenticated, close otherwise
    pub fn bind(&self, mut auth: watch::Receiver<AuthState>) -> TaskGuard {
        let inner = self.inner.clone();
        TaskGuard::spawn(async move {
            loop {
                let user_id = auth
                    .borrow_and_update()
                    .session()
                    .map(|session| session.user_id.clone());
                match user_id {
                    Some(user_id) => inner.open(&user_id),
                    None => inner.close(),
                }

                if auth.changed().await.is_err() {
                    inner.close();
                    break;
                }
            }
        })
    }

    pub fn open(&self, user_id: &str) {
        self.inner.open(user_id);
    }

    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    /// Typed event stream; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Fire-and-forget send. Returns false when the event was dropped
    /// because there is no live connection.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.inner.emit(&event)
    }

    /// Send and wait for the server's acknowledgment
    pub async fn emit_with_ack(&self, event: ClientEvent) -> Result<Ack> {
        self.inner.emit_with_ack(&event).await
    }
}

impl ConnectionInner {
    fn open(self: &Arc<Self>, user_id: &str) {
        let mut active = lock(&self.active);
        if let Some(current) = active.as_ref() {
            if current.user_id == user_id && !current.task.is_finished() {
                return;
            }
        }

        let previous = active.take();
        let epoch = self.reset_link();
        if let Some(previous) = previous {
            drop(previous.task);
            if previous.user_id != user_id {
                info!("Switching realtime connection from {} to {}", previous.user_id, user_id);
                self.publish(ConnectionEvent::Closed);
            }
        }

        // Each opened connection gets its own id so its log lines can be told apart
        let span = info_span!("realtime", connection = %Uuid::new_v4(), user = %user_id);
        info!(parent: &span, "Opening realtime connection");
        let task = TaskGuard::spawn(self.clone().run(epoch, user_id.to_string()).instrument(span));
        *active = Some(ActiveConnection {
            user_id: user_id.to_string(),
            task,
        });
    }

    fn close(&self) {
        let previous = lock(&self.active).take();
        if let Some(previous) = previous {
            drop(previous.task);
            self.reset_link();
            info!("Realtime connection closed for {}", previous.user_id);
            self.publish(ConnectionEvent::Closed);
        }
    }

    /// Drop the outgoing link, fail pending acks and bump the epoch
    fn reset_link(&self) -> u64 {
        let epoch = {
            let mut link = lock(&self.link);
            link.epoch += 1;
            link.outgoing = None;
            link.epoch
        };
        lock(&self.pending_acks).clear();
        self.connected_tx.send_replace(false);
        epoch
    }

    async fn run(self: Arc<Self>, epoch: u64, user_id: String) {
        let max_attempts = self.settings.reconnection_attempts;
        let mut failures = 0u32;

        loop {
            match self.connector.connect(&self.settings.url).await {
                Ok(link) => {
                    failures = 0;
                    self.pump(epoch, link, &user_id).await;
                    if !self.detach(epoch) {
                        return;
                    }
                    warn!("Realtime connection lost");
                    self.publish(ConnectionEvent::Disconnected);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Realtime connection attempt {} failed: {}", failures, e);
                }
            }

            if failures >= max_attempts {
                error!("Giving up on realtime connection after {} failed attempts", failures);
                return;
            }

            self.publish(ConnectionEvent::Reconnecting {
                attempt: failures + 1,
            });
            tokio::time::sleep(self.settings.reconnection_delay).await;
        }
    }

    async fn pump(&self, epoch: u64, link: SocketLink, user_id: &str) {
        let SocketLink {
            outgoing,
            mut incoming,
        } = link;

        {
            let mut state = lock(&self.link);
            if state.epoch != epoch {
                return;
            }
            state.outgoing = Some(outgoing);
        }
        self.connected_tx.send_replace(true);
        info!("Realtime connection established");
        // Registration goes out before anyone hears about the connection
        self.emit(&ClientEvent::RegisterUser {
            user_id: user_id.to_string(),
        });
        self.publish(ConnectionEvent::Connected);

        while let Some(text) = incoming.recv().await {
            match protocol::decode(&text) {
                Ok(Frame::Ack { id, payload }) => {
                    let waiter = lock(&self.pending_acks).remove(&id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(payload);
                        }
                        None => debug!("Acknowledgment {} arrived after its waiter left", id),
                    }
                }
                Ok(Frame::Event(event)) => {
                    if let ServerEvent::Error { message } = &event {
                        warn!("Server reported error: {}", message);
                    }
                    self.publish(ConnectionEvent::Server(event));
                }
                Ok(Frame::Unknown(name)) => debug!("Ignoring unhandled event '{}'", name),
                Err(e) => warn!("Dropping malformed frame: {}", e),
            }
        }
    }

    /// Returns false when the link already belongs to a newer connection
    fn detach(&self, epoch: u64) -> bool {
        {
            let mut state = lock(&self.link);
            if state.epoch != epoch {
                return false;
            }
            state.outgoing = None;
        }
        lock(&self.pending_acks).clear();
        self.connected_tx.send_replace(false);
        true
    }

    fn publish(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn send_frame(&self, event: &ClientEvent, ack: Option<u64>) -> bool {
        let text = match protocol::encode(event, ack) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", event.name(), e);
                return false;
            }
        };

        let state = lock(&self.link);
        match state.outgoing.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    fn emit(&self, event: &ClientEvent) -> bool {
        if !*self.connected_tx.borrow() {
            debug!("Not connected, dropping {}", event.name());
            return false;
        }
        self.send_frame(event, None)
    }

    async fn emit_with_ack(&self, event: &ClientEvent) -> Result<Ack> {
        if !*self.connected_tx.borrow() {
            debug!("Not connected, dropping {}", event.name());
            return Err(ClientError::NotConnected);
        }

        let id = self.next_ack.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_acks).insert(id, tx);

        if !self.send_frame(event, Some(id)) {
            lock(&self.pending_acks).remove(&id);
            return Err(ClientError::NotConnected);
        }

        match tokio::time::timeout(self.settings.ack_timeout, rx).await {
            Ok(Ok(payload)) => Ok(Ack::from_value(payload)),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                lock(&self.pending_acks).remove(&id);
                warn!("No acknowledgment for {} within {:?}", event.name(), self.settings.ack_timeout);
                Err(ClientError::AckTimeout)
            }
        }
    }
}
