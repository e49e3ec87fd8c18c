use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserSummary;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Invitation,
    Accepted,
    Rejected,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub from_user: UserSummary,
    #[serde(default)]
    pub squad_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_pending(&self) -> bool {
        self.status == NotificationStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_format() {
        let notification: Notification = serde_json::from_str(
            r#"{"id":"n1","type":"invitation","status":"pending","fromUser":{"userId":"u9","displayName":"Rekkles"},"squadId":"s1"}"#,
        )
        .unwrap();
        assert_eq!(notification.kind, NotificationKind::Invitation);
        assert!(notification.is_pending());
        assert_eq!(notification.squad_id.as_deref(), Some("s1"));
    }
}
