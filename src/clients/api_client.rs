use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::models::{
    ChatRoom, Conversation, DeleteConversationResponse, ErrorResponse, LoginRequest,
    LoginResponse, Message, Notification, PasswordResetRequest, Preferences, ProfileUpdate,
    RegisterRequest, Session, Squad, SquadInviteRequest, SquadRequest, StartConversationRequest,
    StartConversationResponse, TwoFactorRequest,
};

/// REST client for the LOL Match backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    /// Generation of the session requests are currently sent under
    session_generation: Arc<AtomicU64>,
    /// Generation each non-auth 401 was requested under
    unauthorized: broadcast::Sender<u64>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            session_generation: Arc::new(AtomicU64::new(0)),
            unauthorized: broadcast::channel(16).0,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_generation(&self) -> u64 {
        self.session_generation.load(Ordering::SeqCst)
    }

    /// Start a new session generation. Requests already in flight keep the
    /// old one, so their 401s no longer apply.
    pub fn advance_session_generation(&self) -> u64 {
        self.session_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Yields the session generation of every non-auth request answered 401
    pub fn subscribe_unauthorized(&self) -> broadcast::Receiver<u64> {
        self.unauthorized.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Send a request and turn non-success statuses into `ClientError::Http`.
    /// Auth endpoints report their own 401s and do not expire the session.
    async fn execute(&self, builder: RequestBuilder, auth_endpoint: bool) -> Result<reqwest::Response> {
        let generation = self.session_generation();
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let fallback = status
            .canonical_reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| status.as_u16().to_string());
        let body = response.text().await.unwrap_or_default();
        let message = ErrorResponse::message_from_body(&body, &fallback);

        if status == StatusCode::UNAUTHORIZED && !auth_endpoint {
            warn!("Backend answered 401 for session generation {}", generation);
            // Nobody listening means no session to expire
            let _ = self.unauthorized.send(generation);
        } else {
            debug!("Backend answered {}: {}", status, message);
        }

        Err(ClientError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        Ok(self.execute(builder, false).await?.json().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
        self.execute(builder, false).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(self.request(Method::GET, path)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.request(Method::POST, path).json(body)).await
    }

    async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.request(Method::PUT, path).json(body)).await
    }

    // Auth

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let builder = self.request(Method::POST, "auth/login").json(request);
        Ok(self.execute(builder, true).await?.json().await?)
    }

    pub async fn verify_two_factor(&self, request: &TwoFactorRequest) -> Result<Session> {
        let builder = self.request(Method::POST, "auth/2fa/verify").json(request);
        Ok(self.execute(builder, true).await?.json().await?)
    }

    pub async fn logout(&self) -> Result<()> {
        self.execute(self.request(Method::POST, "auth/logout"), true).await?;
        Ok(())
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        let builder = self.request(Method::POST, "auth/register").json(request);
        self.execute(builder, true).await?;
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let builder = self
            .request(Method::POST, "auth/forgot-password")
            .json(&serde_json::json!({ "email": email }));
        self.execute(builder, true).await?;
        Ok(())
    }

    pub async fn reset_password(&self, request: &PasswordResetRequest) -> Result<()> {
        let builder = self.request(Method::POST, "auth/reset-password").json(request);
        self.execute(builder, true).await?;
        Ok(())
    }

    pub async fn check_session(&self) -> Result<Session> {
        let builder = self.request(Method::GET, "auth/check-session");
        Ok(self.execute(builder, true).await?.json().await?)
    }

    // Profile and account

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Session> {
        self.put("users/profile", update).await
    }

    pub async fn update_preferences(&self, preferences: &Preferences) -> Result<Session> {
        self.put("users/preferences", preferences).await
    }

    pub async fn export_account(&self) -> Result<Value> {
        self.get("users/export").await
    }

    pub async fn delete_account(&self) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, "users/account")).await
    }

    // Squads

    pub async fn list_squads(&self) -> Result<Vec<Squad>> {
        self.get("squads").await
    }

    pub async fn get_squad(&self, squad_id: &str) -> Result<Squad> {
        self.get(&format!("squads/{}", squad_id)).await
    }

    pub async fn create_squad(&self, request: &SquadRequest) -> Result<Squad> {
        self.post("squads", request).await
    }

    pub async fn update_squad(&self, squad_id: &str, request: &SquadRequest) -> Result<Squad> {
        self.put(&format!("squads/{}", squad_id), request).await
    }

    pub async fn delete_squad(&self, squad_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("squads/{}", squad_id)))
            .await
    }

    pub async fn invite_to_squad(&self, squad_id: &str, user_id: &str) -> Result<()> {
        let request = SquadInviteRequest {
            user_id: user_id.to_string(),
        };
        let builder = self
            .request(Method::POST, &format!("squads/{}/invite", squad_id))
            .json(&request);
        self.send_empty(builder).await
    }

    pub async fn leave_squad(&self, squad_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::POST, &format!("squads/{}/leave", squad_id)))
            .await
    }

    pub async fn accept_invitation(&self, notification_id: &str) -> Result<()> {
        let path = format!("squads/invitations/{}/accept", notification_id);
        self.send_empty(self.request(Method::POST, &path)).await
    }

    pub async fn reject_invitation(&self, notification_id: &str) -> Result<()> {
        let path = format!("squads/invitations/{}/reject", notification_id);
        self.send_empty(self.request(Method::POST, &path)).await
    }

    // Chat

    pub async fn list_rooms(&self) -> Result<Vec<ChatRoom>> {
        self.get("chat/rooms").await
    }

    pub async fn room_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        self.get(&format!("chat/rooms/{}/messages", room_id)).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.get("chat/conversations").await
    }

    pub async fn start_conversation(&self, participant_id: &str) -> Result<StartConversationResponse> {
        let request = StartConversationRequest {
            participant_id: participant_id.to_string(),
        };
        self.post("chat/conversations", &request).await
    }

    pub async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.get(&format!("chat/conversations/{}/messages", conversation_id))
            .await
    }

    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        let path = format!("chat/conversations/{}/read", conversation_id);
        self.send_empty(self.request(Method::POST, &path)).await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<DeleteConversationResponse> {
        let path = format!("chat/conversations/{}", conversation_id);
        let response = self.execute(self.request(Method::DELETE, &path), false).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(DeleteConversationResponse::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    // Notifications

    pub async fn list_notifications(&self) -> Result<Vec<Notification>> {
        self.get("notifications").await
    }

    pub async fn delete_notification(&self, notification_id: &str) -> Result<()> {
        let path = format!("notifications/{}", notification_id);
        self.send_empty(self.request(Method::DELETE, &path)).await
    }
}
