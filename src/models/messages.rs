use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Message, Notification};

/// Events the client emits on the realtime channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    RegisterUser { user_id: String },
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    SendMessage { room_id: String, text: String },
    SendPrivateMessage { conversation_id: String, text: String },
    GetRoomCount { room_id: String },
    CheckUserStatus { user_id: String },
    JoinSquadRoom { squad_id: String },
    LeaveSquadRoom { squad_id: String },
    JoinNotificationRoom { user_id: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterUser { .. } => "register-user",
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::LeaveRoom { .. } => "leave-room",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::SendPrivateMessage { .. } => "send-private-message",
            ClientEvent::GetRoomCount { .. } => "get-room-count",
            ClientEvent::CheckUserStatus { .. } => "check-user-status",
            ClientEvent::JoinSquadRoom { .. } => "join-squad-room",
            ClientEvent::LeaveSquadRoom { .. } => "leave-squad-room",
            ClientEvent::JoinNotificationRoom { .. } => "join-notification-room",
        }
    }
}

/// Payload shared by the squad lifecycle events
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SquadEvent {
    pub squad_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Events pushed by the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage(Message),
    ReceivePrivateMessage(Message),
    RoomCount { room_id: String, count: u32 },
    UserStatus { user_id: String, online: bool },
    NewNotification(Notification),
    SquadUpdated(SquadEvent),
    SquadDeleted(SquadEvent),
    SquadMemberJoined(SquadEvent),
    SquadMemberLeft(SquadEvent),
    Error { message: String },
}

/// Acknowledgment payload for acked emits
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Ack {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Ack {
    /// Accepts both `{"success": bool, ...}` and a bare boolean
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Bool(success) => Ack { success, error: None },
            other => serde_json::from_value(other).unwrap_or_else(|_| Ack {
                success: false,
                error: Some("Malformed acknowledgment".to_string()),
            }),
        }
    }
}
