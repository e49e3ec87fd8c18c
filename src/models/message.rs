use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message. Immutable once created; `id` is its identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Where a message lives on the client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Room(String),
    Conversation(String),
}

impl Message {
    pub fn bucket(&self) -> Option<BucketKey> {
        if let Some(conversation_id) = &self.conversation_id {
            return Some(BucketKey::Conversation(conversation_id.clone()));
        }
        self.room_id.clone().map(BucketKey::Room)
    }
}

/// Public chat room as listed by the backend
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub member_count: u32,
}
