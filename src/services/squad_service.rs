use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clients::ApiClient;
use crate::error::Result;
use crate::models::{ClientEvent, ServerEvent, Squad, SquadRequest};
use crate::utils::{Generations, TaskGuard};
use crate::ws::{ConnectionEvent, ConnectionManager};

#[derive(Debug, Default)]
struct SquadState {
    squads: Vec<Squad>,
    fetches: Generations<()>,
    joined_rooms: HashSet<String>,
}

struct SquadShared {
    state: RwLock<SquadState>,
    api: ApiClient,
    connection: ConnectionManager,
}

/// The current user's squads, refreshed on every squad lifecycle event
#[derive(Clone)]
pub struct SquadService {
    shared: Arc<SquadShared>,
    _listener: Arc<TaskGuard>,
}

impl SquadService {
    pub fn new(api: ApiClient, connection: ConnectionManager) -> Self {
        let events = connection.subscribe();
        let shared = Arc::new(SquadShared {
            state: RwLock::new(SquadState::default()),
            api,
            connection,
        });
        let listener = TaskGuard::spawn(listen(shared.clone(), events));

        Self {
            shared,
            _listener: Arc::new(listener),
        }
    }

    pub async fn fetch_squads(&self) -> Result<()> {
        self.shared.fetch().await
    }

    pub async fn squads(&self) -> Vec<Squad> {
        self.shared.state.read().await.squads.clone()
    }

    pub async fn get_squad(&self, squad_id: &str) -> Result<Squad> {
        self.shared.api.get_squad(squad_id).await
    }

    pub async fn create_squad(&self, request: &SquadRequest) -> Result<Squad> {
        let squad = self.shared.api.create_squad(request).await?;
        info!("Created squad {} ({})", squad.name, squad.id);
        self.shared.reconcile().await;
        Ok(squad)
    }

    pub async fn update_squad(&self, squad_id: &str, request: &SquadRequest) -> Result<Squad> {
        let squad = self.shared.api.update_squad(squad_id, request).await?;
        self.shared.reconcile().await;
        Ok(squad)
    }

    pub async fn delete_squad(&self, squad_id: &str) -> Result<()> {
        self.shared.api.delete_squad(squad_id).await?;
        info!("Deleted squad {}", squad_id);
        self.leave_squad_room(squad_id).await;
        self.shared.reconcile().await;
        Ok(())
    }

    pub async fn invite_member(&self, squad_id: &str, user_id: &str) -> Result<()> {
        self.shared.api.invite_to_squad(squad_id, user_id).await?;
        info!("Invited {} to squad {}", user_id, squad_id);
        self.shared.reconcile().await;
        Ok(())
    }

    pub async fn leave_squad(&self, squad_id: &str) -> Result<()> {
        self.shared.api.leave_squad(squad_id).await?;
        info!("Left squad {}", squad_id);
        self.leave_squad_room(squad_id).await;
        self.shared.reconcile().await;
        Ok(())
    }

    /// Subscribe to a squad's realtime room. Returns false when disconnected.
    pub async fn join_squad_room(&self, squad_id: &str) -> bool {
        let sent = self.shared.connection.emit(ClientEvent::JoinSquadRoom {
            squad_id: squad_id.to_string(),
        });
        if sent {
            self.shared
                .state
                .write()
                .await
                .joined_rooms
                .insert(squad_id.to_string());
        }
        sent
    }

    pub async fn leave_squad_room(&self, squad_id: &str) {
        self.shared.connection.emit(ClientEvent::LeaveSquadRoom {
            squad_id: squad_id.to_string(),
        });
        self.shared.state.write().await.joined_rooms.remove(squad_id);
    }

    pub async fn is_in_squad_room(&self, squad_id: &str) -> bool {
        self.shared.state.read().await.joined_rooms.contains(squad_id)
    }
}

impl SquadShared {
    async fn fetch(&self) -> Result<()> {
        let token = self.state.write().await.fetches.begin(());
        let squads = self.api.list_squads().await?;

        let mut state = self.state.write().await;
        if state.fetches.is_current(&(), token) {
            state.squads = squads;
        } else {
            debug!("Discarding stale squad list");
        }
        Ok(())
    }

    async fn reconcile(&self) {
        if let Err(e) = self.fetch().await {
            warn!("Failed to refresh squads: {}", e);
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Disconnected => self.state.write().await.joined_rooms.clear(),
            ConnectionEvent::Closed => {
                let mut state = self.state.write().await;
                state.squads.clear();
                state.joined_rooms.clear();
                state.fetches.invalidate_all();
            }
            ConnectionEvent::Server(
                ServerEvent::SquadUpdated(squad)
                | ServerEvent::SquadDeleted(squad)
                | ServerEvent::SquadMemberJoined(squad)
                | ServerEvent::SquadMemberLeft(squad),
            ) => {
                debug!("Squad {} changed, refreshing", squad.squad_id);
                // Refresh off the listener so later events are not held up
                let shared = self.clone();
                tokio::spawn(async move { shared.reconcile().await });
            }
            _ => {}
        }
    }
}

async fn listen(shared: Arc<SquadShared>, mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => shared.handle_event(event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Squad listener missed {} events, re-fetching", missed);
                shared.reconcile().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
