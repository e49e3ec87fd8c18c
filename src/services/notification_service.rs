use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::SessionManager;
use crate::clients::ApiClient;
use crate::error::Result;
use crate::models::{ClientEvent, Notification, NotificationStatus, ServerEvent};
use crate::utils::{Generations, TaskGuard};
use crate::ws::{ConnectionEvent, ConnectionManager};

/// Local notification list; the pending count is always derived from it
#[derive(Debug, Default)]
pub struct NotificationState {
    items: Vec<Notification>,
    fetches: Generations<()>,
}

impl NotificationState {
    pub fn begin_fetch(&mut self) -> u64 {
        self.fetches.begin(())
    }

    pub fn apply_fetch(&mut self, token: u64, items: Vec<Notification>) -> bool {
        if !self.fetches.is_current(&(), token) {
            debug!("Discarding stale notification list");
            return false;
        }
        let mut seen = HashSet::new();
        self.items = items
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();
        true
    }

    /// Pushed notifications go to the head, once per id
    pub fn insert_live(&mut self, notification: Notification) -> bool {
        if self.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.items.insert(0, notification);
        true
    }

    pub fn set_status(&mut self, id: &str, status: NotificationStatus) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }

    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|n| n.is_pending()).count()
    }

    pub fn items(&self) -> Vec<Notification> {
        self.items.clone()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.fetches.invalidate_all();
    }
}

/// Tasks that live for one connection
struct ConnectedTasks {
    _handshake: TaskGuard,
    _refresh: TaskGuard,
}

struct NotificationShared {
    state: RwLock<NotificationState>,
    api: ApiClient,
    connection: ConnectionManager,
    session: SessionManager,
    join_retry: Duration,
    refresh_every: Duration,
    connected_tasks: Mutex<Option<ConnectedTasks>>,
}

#[derive(Clone)]
pub struct NotificationService {
    shared: Arc<NotificationShared>,
    _listener: Arc<TaskGuard>,
}

impl NotificationService {
    pub fn new(
        api: ApiClient,
        connection: ConnectionManager,
        session: SessionManager,
        join_retry: Duration,
        refresh_every: Duration,
    ) -> Self {
        let events = connection.subscribe();
        let shared = Arc::new(NotificationShared {
            state: RwLock::new(NotificationState::default()),
            api,
            connection,
            session,
            join_retry,
            refresh_every,
            connected_tasks: Mutex::new(None),
        });
        let listener = TaskGuard::spawn(listen(shared.clone(), events));

        Self {
            shared,
            _listener: Arc::new(listener),
        }
    }

    /// Replace the list with the server's
    pub async fn fetch_notifications(&self) -> Result<()> {
        self.shared.fetch().await
    }

    pub async fn accept_invitation(&self, notification_id: &str) -> Result<()> {
        self.shared
            .state
            .write()
            .await
            .set_status(notification_id, NotificationStatus::Accepted);
        let result = self.shared.api.accept_invitation(notification_id).await;
        self.shared.reconcile().await;
        if result.is_ok() {
            info!("Accepted invitation {}", notification_id);
        }
        result
    }

    pub async fn reject_invitation(&self, notification_id: &str) -> Result<()> {
        self.shared
            .state
            .write()
            .await
            .set_status(notification_id, NotificationStatus::Rejected);
        let result = self.shared.api.reject_invitation(notification_id).await;
        self.shared.reconcile().await;
        if result.is_ok() {
            info!("Rejected invitation {}", notification_id);
        }
        result
    }

    pub async fn delete_notification(&self, notification_id: &str) -> Result<()> {
        self.shared.state.write().await.remove(notification_id);
        let result = self.shared.api.delete_notification(notification_id).await;
        self.shared.reconcile().await;
        result
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.shared.state.read().await.items()
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.state.read().await.pending_count()
    }
}

impl NotificationShared {
    async fn fetch(&self) -> Result<()> {
        let token = self.state.write().await.begin_fetch();
        let items = self.api.list_notifications().await?;
        self.state.write().await.apply_fetch(token, items);
        Ok(())
    }

    /// Authoritative re-fetch after an optimistic change
    async fn reconcile(&self) {
        if let Err(e) = self.fetch().await {
            warn!("Failed to refresh notifications: {}", e);
        }
    }

    fn start_connected_tasks(self: &Arc<Self>) {
        let user_id = match self.session.user_id() {
            Some(user_id) => user_id,
            None => {
                debug!("Connected without a session, skipping notification room");
                return;
            }
        };

        let handshake = TaskGuard::spawn(join_notification_room(
            self.connection.clone(),
            user_id,
            self.join_retry,
        ));
        let refresh = TaskGuard::spawn(refresh_periodically(
            Arc::downgrade(self),
            self.refresh_every,
        ));

        if let Ok(mut tasks) = self.connected_tasks.lock() {
            *tasks = Some(ConnectedTasks {
                _handshake: handshake,
                _refresh: refresh,
            });
        }
    }

    fn stop_connected_tasks(&self) {
        if let Ok(mut tasks) = self.connected_tasks.lock() {
            tasks.take();
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.start_connected_tasks(),
            ConnectionEvent::Disconnected => self.stop_connected_tasks(),
            ConnectionEvent::Closed => {
                self.stop_connected_tasks();
                self.state.write().await.clear();
            }
            ConnectionEvent::Server(ServerEvent::NewNotification(notification)) => {
                let id = notification.id.clone();
                if self.state.write().await.insert_live(notification) {
                    info!("New notification {}", id);
                } else {
                    debug!("Ignoring duplicate notification {}", id);
                }
            }
            _ => {}
        }
    }
}

/// Join the per-user notification room, retrying on a fixed interval until
/// the server acknowledges. Dropped with the connection.
async fn join_notification_room(connection: ConnectionManager, user_id: String, retry: Duration) {
    let mut ticker = tokio::time::interval(retry);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let event = ClientEvent::JoinNotificationRoom {
            user_id: user_id.clone(),
        };
        match connection.emit_with_ack(event).await {
            Ok(ack) if ack.success => {
                info!("Joined notification room for {}", user_id);
                return;
            }
            Ok(ack) => warn!(
                "Notification room join refused, retrying: {}",
                ack.error.unwrap_or_default()
            ),
            Err(e) => warn!("Notification room join failed, retrying: {}", e),
        }
    }
}

async fn refresh_periodically(shared: Weak<NotificationShared>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match shared.upgrade() {
            Some(shared) => shared.reconcile().await,
            None => break,
        }
    }
}

async fn listen(shared: Arc<NotificationShared>, mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => shared.handle_event(event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Notification listener missed {} events, re-fetching", missed);
                shared.reconcile().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationKind, UserSummary};

    fn invitation(id: &str, status: NotificationStatus) -> Notification {
        Notification {
            id: id.to_string(),
            kind: NotificationKind::Invitation,
            status,
            from_user: UserSummary {
                user_id: "u9".to_string(),
                display_name: "Rekkles".to_string(),
                avatar: None,
            },
            squad_id: Some("s1".to_string()),
            created_at: None,
        }
    }

    #[test]
    fn test_pending_count_tracks_list() {
        let mut state = NotificationState::default();
        let token = state.begin_fetch();
        state.apply_fetch(
            token,
            vec![
                invitation("n1", NotificationStatus::Pending),
                invitation("n2", NotificationStatus::Accepted),
                invitation("n3", NotificationStatus::Pending),
            ],
        );
        assert_eq!(state.pending_count(), 2);

        state.set_status("n1", NotificationStatus::Rejected);
        assert_eq!(state.pending_count(), 1);

        state.remove("n3");
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_live_insert_is_idempotent_and_at_head() {
        let mut state = NotificationState::default();
        let token = state.begin_fetch();
        state.apply_fetch(token, vec![invitation("n1", NotificationStatus::Pending)]);

        assert!(state.insert_live(invitation("n2", NotificationStatus::Pending)));
        assert!(!state.insert_live(invitation("n2", NotificationStatus::Pending)));
        assert!(!state.insert_live(invitation("n1", NotificationStatus::Pending)));

        let ids: Vec<String> = state.items().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n2", "n1"]);
        assert_eq!(state.pending_count(), 2);
    }

    #[test]
    fn test_stale_fetch_does_not_overwrite() {
        let mut state = NotificationState::default();
        let older = state.begin_fetch();
        let newer = state.begin_fetch();
        assert!(state.apply_fetch(newer, vec![invitation("n2", NotificationStatus::Pending)]));
        assert!(!state.apply_fetch(older, vec![]));
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn test_clear_drops_items_and_in_flight_fetches() {
        let mut state = NotificationState::default();
        let token = state.begin_fetch();
        state.insert_live(invitation("n1", NotificationStatus::Pending));
        state.clear();
        assert!(!state.apply_fetch(token, vec![invitation("n1", NotificationStatus::Pending)]));
        assert_eq!(state.pending_count(), 0);
    }
}
