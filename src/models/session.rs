use serde::{Deserialize, Serialize};

/// Authenticated user as known to the client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub preferences: Preferences,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Moderator,
    Admin,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Summary of another user as embedded in conversations and notifications
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub summoner_name: Option<String>,
}

/// Answer to a login attempt. Accounts with 2FA get a challenge token instead
/// of a session.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub user: Option<Session>,
    #[serde(default)]
    pub requires_two_factor: bool,
    #[serde(default)]
    pub challenge_token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorRequest {
    pub challenge_token: String,
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    pub token: String,
    pub new_password: String,
}

/// Partial profile update; absent fields are left unchanged
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults_for_missing_fields() {
        let session: Session =
            serde_json::from_str(r#"{"userId":"u1","displayName":"Faker"}"#).unwrap();
        assert_eq!(session.role, UserRole::User);
        assert_eq!(session.avatar, None);
        assert_eq!(session.preferences, Preferences::default());
    }

    #[test]
    fn test_two_factor_login_response() {
        let response: LoginResponse =
            serde_json::from_str(r#"{"requiresTwoFactor":true,"challengeToken":"c-1"}"#).unwrap();
        assert!(response.user.is_none());
        assert!(response.requires_two_factor);
        assert_eq!(response.challenge_token.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_profile_update_skips_absent_fields() {
        let update = ProfileUpdate {
            display_name: Some("Caps".to_string()),
            avatar: None,
        };
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"displayName":"Caps"}"#);
    }
}
