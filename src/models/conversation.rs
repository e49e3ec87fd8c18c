use serde::{Deserialize, Serialize};

use super::{Message, UserSummary};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub other_participant: UserSummary,
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Unread count reported by the server at fetch time
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    pub participant_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    pub conversation_id: String,
    #[serde(default)]
    pub conversation: Option<Conversation>,
}

/// Result of a conversation delete. The conversation is only gone for both
/// sides once both participants deleted it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConversationResponse {
    #[serde(default)]
    pub fully_deleted: bool,
}
