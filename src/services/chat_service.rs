use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::SessionManager;
use crate::clients::ApiClient;
use crate::error::Result;
use crate::models::{BucketKey, ChatRoom, ClientEvent, Conversation, Message, ServerEvent};
use crate::utils::{Generations, TaskGuard};
use crate::ws::{ConnectionEvent, ConnectionManager, PresenceCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListKey {
    Rooms,
    Conversations,
}

/// Outcome of applying a pushed private message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateMerge {
    Duplicate,
    Merged,
    /// Stored, but the conversation is not in the local list yet
    UnknownConversation,
}

/// Local chat state. Every bucket holds at most one message per id.
#[derive(Debug, Default)]
pub struct ChatState {
    buckets: HashMap<BucketKey, Vec<Message>>,
    history: Generations<BucketKey>,
    lists: Generations<ListKey>,
    active_rooms: HashSet<String>,
    room_counts: HashMap<String, u32>,
    rooms: Vec<ChatRoom>,
    conversations: Vec<Conversation>,
    /// Ids of pushed messages not yet read, per conversation
    live_unread: HashMap<String, HashSet<String>>,
    open_conversation: Option<String>,
}

impl ChatState {
    /// Idempotent merge by identity: append unless the id is already there
    pub fn merge_message(&mut self, message: Message) -> bool {
        let key = match message.bucket() {
            Some(key) => key,
            None => {
                debug!("Message {} has no room or conversation", message.id);
                return false;
            }
        };

        let bucket = self.buckets.entry(key).or_default();
        if bucket.iter().any(|m| m.id == message.id) {
            return false;
        }
        bucket.push(message);
        true
    }

    pub fn begin_history(&mut self, key: BucketKey) -> u64 {
        self.history.begin(key)
    }

    /// Replace a bucket wholesale with fetched history. Stale tokens are
    /// rejected; duplicate ids in the response keep their first occurrence.
    pub fn apply_history(&mut self, key: BucketKey, token: u64, messages: Vec<Message>) -> bool {
        if !self.history.is_current(&key, token) {
            debug!("Discarding stale history for {:?}", key);
            return false;
        }

        let mut seen = HashSet::new();
        let messages: Vec<Message> = messages
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        self.buckets.insert(key, messages);
        true
    }

    pub fn messages(&self, key: &BucketKey) -> Vec<Message> {
        self.buckets.get(key).cloned().unwrap_or_default()
    }

    pub fn mark_room_active(&mut self, room_id: &str) {
        self.active_rooms.insert(room_id.to_string());
    }

    pub fn deactivate_room(&mut self, room_id: &str) {
        self.active_rooms.remove(room_id);
    }

    pub fn is_room_active(&self, room_id: &str) -> bool {
        self.active_rooms.contains(room_id)
    }

    pub fn active_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.active_rooms.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn set_room_count(&mut self, room_id: &str, count: u32) {
        self.room_counts.insert(room_id.to_string(), count);
    }

    pub fn room_count(&self, room_id: &str) -> Option<u32> {
        self.room_counts.get(room_id).copied()
    }

    /// Join bookkeeping does not survive a lost connection
    pub fn reset_connection_state(&mut self) {
        self.active_rooms.clear();
        self.room_counts.clear();
    }

    /// Forget everything and make in-flight loads stale
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.history.invalidate_all();
        self.lists.invalidate_all();
        self.active_rooms.clear();
        self.room_counts.clear();
        self.rooms.clear();
        self.conversations.clear();
        self.live_unread.clear();
        self.open_conversation = None;
    }

    fn begin_rooms(&mut self) -> u64 {
        self.lists.begin(ListKey::Rooms)
    }

    fn apply_rooms(&mut self, token: u64, rooms: Vec<ChatRoom>) -> bool {
        if !self.lists.is_current(&ListKey::Rooms, token) {
            return false;
        }
        self.rooms = rooms;
        true
    }

    pub fn rooms(&self) -> Vec<ChatRoom> {
        self.rooms.clone()
    }

    pub fn begin_conversations(&mut self) -> u64 {
        self.lists.begin(ListKey::Conversations)
    }

    /// Replace the conversation list. Server unread counts become the new
    /// baseline, so locally tracked unread ids are dropped.
    pub fn apply_conversations(&mut self, token: u64, conversations: Vec<Conversation>) -> bool {
        if !self.lists.is_current(&ListKey::Conversations, token) {
            debug!("Discarding stale conversation list");
            return false;
        }

        let mut seen = HashSet::new();
        self.conversations = conversations
            .into_iter()
            .filter(|c| seen.insert(c.conversation_id.clone()))
            .collect();
        self.live_unread.clear();
        if let Some(open) = self.open_conversation.clone() {
            self.mark_read(&open);
        }
        true
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation.conversation_id)
        {
            Some(existing) => *existing = conversation,
            None => self.conversations.insert(0, conversation),
        }
    }

    pub fn has_conversation(&self, conversation_id: &str) -> bool {
        self.conversations
            .iter()
            .any(|c| c.conversation_id == conversation_id)
    }

    pub fn record_private_message(&mut self, message: Message, self_user_id: Option<&str>) -> PrivateMerge {
        let conversation_id = match message.conversation_id.clone() {
            Some(id) => id,
            None => return PrivateMerge::Duplicate,
        };
        if !self.merge_message(message.clone()) {
            return PrivateMerge::Duplicate;
        }

        let is_own = self_user_id == Some(message.sender_id.as_str());
        let is_open = self.open_conversation.as_deref() == Some(conversation_id.as_str());
        if !is_own && !is_open {
            self.live_unread
                .entry(conversation_id.clone())
                .or_default()
                .insert(message.id.clone());
        }

        match self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            Some(conversation) => {
                let newer = conversation
                    .last_message
                    .as_ref()
                    .map(|last| message.created_at >= last.created_at)
                    .unwrap_or(true);
                if newer {
                    conversation.last_message = Some(message);
                }
                PrivateMerge::Merged
            }
            None => PrivateMerge::UnknownConversation,
        }
    }

    pub fn unread_count(&self, conversation_id: &str) -> u32 {
        let baseline = self
            .conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
            .map(|c| c.unread_count)
            .unwrap_or(0);
        let live = self
            .live_unread
            .get(conversation_id)
            .map(|ids| ids.len() as u32)
            .unwrap_or(0);
        baseline + live
    }

    pub fn total_unread(&self) -> u32 {
        let mut ids: HashSet<&str> = self
            .conversations
            .iter()
            .map(|c| c.conversation_id.as_str())
            .collect();
        ids.extend(self.live_unread.keys().map(|k| k.as_str()));
        ids.into_iter().map(|id| self.unread_count(id)).sum()
    }

    pub fn mark_read(&mut self, conversation_id: &str) {
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            conversation.unread_count = 0;
        }
        self.live_unread.remove(conversation_id);
    }

    pub fn set_open_conversation(&mut self, conversation_id: Option<&str>) {
        self.open_conversation = conversation_id.map(|id| id.to_string());
        if let Some(id) = conversation_id {
            self.mark_read(id);
        }
    }

    pub fn open_conversation(&self) -> Option<String> {
        self.open_conversation.clone()
    }

    /// Remove a conversation from the local list. `purge` also drops its
    /// messages, used once neither participant keeps it.
    pub fn remove_conversation(&mut self, conversation_id: &str, purge: bool) {
        self.conversations
            .retain(|c| c.conversation_id != conversation_id);
        self.live_unread.remove(conversation_id);
        if self.open_conversation.as_deref() == Some(conversation_id) {
            self.open_conversation = None;
        }

        let key = BucketKey::Conversation(conversation_id.to_string());
        if purge {
            self.buckets.remove(&key);
        }
        self.history.invalidate(&key);
    }

    /// Conversations with unread counts derived from the local state
    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations
            .iter()
            .map(|c| Conversation {
                unread_count: self.unread_count(&c.conversation_id),
                ..c.clone()
            })
            .collect()
    }
}

struct ChatShared {
    state: RwLock<ChatState>,
    api: ApiClient,
    connection: ConnectionManager,
    session: SessionManager,
    presence: PresenceCache,
}

/// Keeps rooms, conversations and their messages in sync with the server
#[derive(Clone)]
pub struct ChatService {
    shared: Arc<ChatShared>,
    _listener: Arc<TaskGuard>,
}

impl ChatService {
    pub fn new(
        api: ApiClient,
        connection: ConnectionManager,
        session: SessionManager,
        presence: PresenceCache,
    ) -> Self {
        let events = connection.subscribe();
        let shared = Arc::new(ChatShared {
            state: RwLock::new(ChatState::default()),
            api,
            connection,
            session,
            presence,
        });
        let listener = TaskGuard::spawn(listen(shared.clone(), events));

        Self {
            shared,
            _listener: Arc::new(listener),
        }
    }

    /// Join a room. The room only counts as joined once the server
    /// acknowledges, after which its history is loaded.
    pub async fn join_room(&self, room_id: &str) -> bool {
        let event = ClientEvent::JoinRoom {
            room_id: room_id.to_string(),
        };
        let ack = match self.shared.connection.emit_with_ack(event).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Failed to join room {}: {}", room_id, e);
                return false;
            }
        };
        if !ack.success {
            warn!(
                "Server refused to join room {}: {}",
                room_id,
                ack.error.unwrap_or_default()
            );
            return false;
        }

        self.shared.state.write().await.mark_room_active(room_id);
        info!("Joined room {}", room_id);

        if let Err(e) = self.load_room_history(room_id).await {
            warn!("Failed to load history for room {}: {}", room_id, e);
        }
        true
    }

    /// Leave a room; the local marker goes away whether or not the server hears it
    pub async fn leave_room(&self, room_id: &str) {
        self.shared.connection.emit(ClientEvent::LeaveRoom {
            room_id: room_id.to_string(),
        });
        self.shared.state.write().await.deactivate_room(room_id);
        info!("Left room {}", room_id);
    }

    /// Returns false when nothing was sent. The message shows up once the
    /// server echoes it back.
    pub fn send_room_message(&self, room_id: &str, text: &str) -> bool {
        self.send_with_ack(ClientEvent::SendMessage {
            room_id: room_id.to_string(),
            text: text.trim().to_string(),
        })
    }

    pub fn send_private_message(&self, conversation_id: &str, text: &str) -> bool {
        self.send_with_ack(ClientEvent::SendPrivateMessage {
            conversation_id: conversation_id.to_string(),
            text: text.trim().to_string(),
        })
    }

    fn send_with_ack(&self, event: ClientEvent) -> bool {
        let blank = match &event {
            ClientEvent::SendMessage { text, .. } | ClientEvent::SendPrivateMessage { text, .. } => {
                text.is_empty()
            }
            _ => false,
        };
        if blank || !self.shared.connection.is_connected() {
            debug!("Not sending {}", event.name());
            return false;
        }

        let connection = self.shared.connection.clone();
        tokio::spawn(async move {
            let name = event.name();
            match connection.emit_with_ack(event).await {
                Ok(ack) if ack.success => debug!("{} acknowledged", name),
                Ok(ack) => warn!("{} rejected: {}", name, ack.error.unwrap_or_default()),
                Err(e) => warn!("{} failed: {}", name, e),
            }
        });
        true
    }

    /// Create (or reuse) the private conversation with another user
    pub async fn start_private_chat(&self, participant_id: &str) -> Result<String> {
        let response = self.shared.api.start_conversation(participant_id).await?;
        let conversation_id = response.conversation_id.clone();

        match response.conversation {
            Some(conversation) => self.shared.state.write().await.upsert_conversation(conversation),
            None => {
                let known = self.shared.state.read().await.has_conversation(&conversation_id);
                if !known {
                    self.fetch_conversations().await?;
                }
            }
        }
        info!("Private conversation {} with {}", conversation_id, participant_id);
        Ok(conversation_id)
    }

    pub async fn load_room_history(&self, room_id: &str) -> Result<()> {
        let key = BucketKey::Room(room_id.to_string());
        let token = self.shared.state.write().await.begin_history(key.clone());
        let messages = self.shared.api.room_messages(room_id).await?;
        let count = messages.len();
        if self.shared.state.write().await.apply_history(key, token, messages) {
            debug!("Loaded {} messages for room {}", count, room_id);
        }
        Ok(())
    }

    pub async fn load_conversation_history(&self, conversation_id: &str) -> Result<()> {
        let key = BucketKey::Conversation(conversation_id.to_string());
        let token = self.shared.state.write().await.begin_history(key.clone());
        let messages = self.shared.api.conversation_messages(conversation_id).await?;
        self.shared
            .state
            .write()
            .await
            .apply_history(key, token, messages);
        Ok(())
    }

    pub async fn fetch_rooms(&self) -> Result<Vec<ChatRoom>> {
        let token = self.shared.state.write().await.begin_rooms();
        let rooms = self.shared.api.list_rooms().await?;
        self.shared
            .state
            .write()
            .await
            .apply_rooms(token, rooms.clone());
        Ok(rooms)
    }

    pub async fn fetch_conversations(&self) -> Result<()> {
        self.shared.fetch_conversations().await
    }

    /// Mark the conversation read, tell the server and load its history
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        self.shared
            .state
            .write()
            .await
            .set_open_conversation(Some(conversation_id));

        if let Err(e) = self.shared.api.mark_conversation_read(conversation_id).await {
            warn!("Failed to mark conversation {} read: {}", conversation_id, e);
        }
        self.load_conversation_history(conversation_id).await
    }

    pub async fn close_conversation(&self) {
        self.shared.state.write().await.set_open_conversation(None);
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let response = self.shared.api.delete_conversation(conversation_id).await?;
        self.shared
            .state
            .write()
            .await
            .remove_conversation(conversation_id, response.fully_deleted);
        info!(
            "Deleted conversation {} (removed for both: {})",
            conversation_id, response.fully_deleted
        );
        Ok(())
    }

    pub fn request_room_count(&self, room_id: &str) -> bool {
        self.shared.connection.emit(ClientEvent::GetRoomCount {
            room_id: room_id.to_string(),
        })
    }

    pub fn check_user_status(&self, user_id: &str) -> bool {
        self.shared.connection.emit(ClientEvent::CheckUserStatus {
            user_id: user_id.to_string(),
        })
    }

    pub fn is_user_online(&self, user_id: &str) -> Option<bool> {
        self.shared.presence.get(user_id)
    }

    pub fn online_users(&self) -> Vec<String> {
        self.shared.presence.online_users()
    }

    pub async fn room_messages(&self, room_id: &str) -> Vec<Message> {
        self.shared
            .state
            .read()
            .await
            .messages(&BucketKey::Room(room_id.to_string()))
    }

    pub async fn conversation_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.shared
            .state
            .read()
            .await
            .messages(&BucketKey::Conversation(conversation_id.to_string()))
    }

    pub async fn is_room_active(&self, room_id: &str) -> bool {
        self.shared.state.read().await.is_room_active(room_id)
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.shared.state.read().await.active_rooms()
    }

    pub async fn room_count(&self, room_id: &str) -> Option<u32> {
        self.shared.state.read().await.room_count(room_id)
    }

    pub async fn rooms(&self) -> Vec<ChatRoom> {
        self.shared.state.read().await.rooms()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.shared.state.read().await.conversations()
    }

    pub async fn total_unread(&self) -> u32 {
        self.shared.state.read().await.total_unread()
    }
}

impl ChatShared {
    async fn fetch_conversations(&self) -> Result<()> {
        let token = self.state.write().await.begin_conversations();
        let conversations = self.api.list_conversations().await?;
        self.state
            .write()
            .await
            .apply_conversations(token, conversations);
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.presence.clear(),
            ConnectionEvent::Disconnected => {
                self.state.write().await.reset_connection_state();
                self.presence.clear();
            }
            ConnectionEvent::Closed => {
                self.state.write().await.clear();
                self.presence.clear();
            }
            ConnectionEvent::Reconnecting { .. } => {}
            ConnectionEvent::Server(ServerEvent::ReceiveMessage(message)) => {
                let id = message.id.clone();
                if !self.state.write().await.merge_message(message) {
                    debug!("Ignoring duplicate message {}", id);
                }
            }
            ConnectionEvent::Server(ServerEvent::ReceivePrivateMessage(message)) => {
                let self_user_id = self.session.user_id();
                let outcome = self
                    .state
                    .write()
                    .await
                    .record_private_message(message, self_user_id.as_deref());
                if outcome == PrivateMerge::UnknownConversation {
                    // Pick up the new conversation without stalling the listener
                    let shared = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = shared.fetch_conversations().await {
                            warn!("Failed to refresh conversations: {}", e);
                        }
                    });
                }
            }
            ConnectionEvent::Server(ServerEvent::RoomCount { room_id, count }) => {
                self.state.write().await.set_room_count(&room_id, count);
            }
            ConnectionEvent::Server(ServerEvent::UserStatus { user_id, online }) => {
                self.presence.set(&user_id, online);
            }
            ConnectionEvent::Server(_) => {}
        }
    }

    /// Rebuild what the missed events could have changed. A missed `Closed`
    /// or `Disconnected` is inferred from the session and connection state.
    async fn recover_from_lag(self: &Arc<Self>) {
        self.presence.clear();

        if self.session.user_id().is_none() {
            self.state.write().await.clear();
            return;
        }
        if !self.connection.is_connected() {
            self.state.write().await.reset_connection_state();
        }

        // Reload off the listener so newer events are not held up
        let shared = self.clone();
        tokio::spawn(async move {
            shared.reload_active_rooms().await;
            if let Err(e) = shared.fetch_conversations().await {
                warn!("Failed to refresh conversations: {}", e);
            }
        });
    }

    /// History reloads after missed events; replace semantics make it safe
    async fn reload_active_rooms(self: &Arc<Self>) {
        let rooms = self.state.read().await.active_rooms();
        for room_id in rooms {
            let key = BucketKey::Room(room_id.clone());
            let token = self.state.write().await.begin_history(key.clone());
            match self.api.room_messages(&room_id).await {
                Ok(messages) => {
                    self.state.write().await.apply_history(key, token, messages);
                }
                Err(e) => warn!("Failed to reload room {}: {}", room_id, e),
            }
        }
    }
}

async fn listen(shared: Arc<ChatShared>, mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => shared.handle_event(event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Chat listener missed {} events, resynchronizing", missed);
                shared.recover_from_lag().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
