use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::session_cookie::SessionCookieStore;
use crate::clients::ApiClient;
use crate::error::{ClientError, Result};
use crate::models::{
    LoginRequest, PasswordResetRequest, Preferences, ProfileUpdate, RegisterRequest, Session,
    TwoFactorRequest,
};
use crate::utils::TaskGuard;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Checking,
    Authenticated(Session),
    Anonymous,
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

/// Result of a password login
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(Session),
    TwoFactorRequired { challenge_token: String },
}

struct SessionInner {
    api: ApiClient,
    cookies: SessionCookieStore,
    state_tx: watch::Sender<AuthState>,
}

/// Owns the session state machine:
/// `Checking -> Authenticated | Anonymous`, `Authenticated -> Anonymous`
/// and `Anonymous -> Authenticated` through login.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
    _expiry: Arc<TaskGuard>,
}

impl SessionManager {
    pub fn new(api: ApiClient, cookies: SessionCookieStore) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Checking);
        let inner = Arc::new(SessionInner {
            api,
            cookies,
            state_tx,
        });

        // A 401 from a regular endpoint ends the session it was sent under
        let weak = Arc::downgrade(&inner);
        let mut notices = inner.api.subscribe_unauthorized();
        let expiry = TaskGuard::spawn(async move {
            loop {
                let generation = match notices.recv().await {
                    Ok(generation) => generation,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} unauthorized notices", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                match weak.upgrade() {
                    Some(inner) => {
                        if !inner.expire_generation(generation, "server answered 401") {
                            debug!("Ignoring 401 from an earlier session");
                        }
                    }
                    None => break,
                }
            }
        });

        Self {
            inner,
            _expiry: Arc::new(expiry),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current(&self) -> AuthState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state_tx.borrow().session().cloned()
    }

    pub fn user_id(&self) -> Option<String> {
        self.session().map(|s| s.user_id)
    }

    /// Session mirrored in the cookie from an earlier run, if still fresh
    pub fn cached_session(&self) -> Option<Session> {
        self.inner.cookies.load()
    }

    /// The one startup check. Any failure resolves to anonymous and clears the
    /// cookie, whatever it contained. A login that lands while the check is in
    /// flight wins over its result.
    pub async fn bootstrap(&self) -> AuthState {
        if !matches!(self.current(), AuthState::Checking) {
            debug!("Session already resolved, skipping bootstrap check");
            return self.current();
        }

        let session = match self.inner.api.check_session().await {
            Ok(session) => Some(session),
            Err(e) => {
                if e.is_unauthorized() {
                    info!("No active session");
                } else {
                    warn!("Session check failed: {}", e);
                }
                None
            }
        };

        let user_id = session.as_ref().map(|s| s.user_id.clone());
        if self.inner.resolve_check(session) {
            if let Some(user_id) = user_id {
                info!("Session restored for {}", user_id);
            }
        } else {
            debug!("Session resolved during the startup check, dropping its result");
        }
        self.current()
    }

    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<LoginOutcome> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            remember_me,
        };
        let response = self.inner.api.login(&request).await?;

        if response.requires_two_factor {
            let challenge_token = response.challenge_token.ok_or_else(|| {
                ClientError::UnexpectedResponse("two-factor challenge without token".to_string())
            })?;
            info!("Login requires two-factor verification");
            return Ok(LoginOutcome::TwoFactorRequired { challenge_token });
        }

        match response.user {
            Some(session) => {
                info!("Logged in as {}", session.user_id);
                self.inner.authenticate(session.clone());
                Ok(LoginOutcome::Authenticated(session))
            }
            None => Err(ClientError::UnexpectedResponse(
                "login response carried no user".to_string(),
            )),
        }
    }

    pub async fn verify_two_factor(&self, challenge_token: &str, code: &str) -> Result<Session> {
        let request = TwoFactorRequest {
            challenge_token: challenge_token.to_string(),
            code: code.to_string(),
        };
        let session = self.inner.api.verify_two_factor(&request).await?;
        info!("Two-factor verification succeeded for {}", session.user_id);
        self.inner.authenticate(session.clone());
        Ok(session)
    }

    /// Local state is cleared even when the server call fails
    pub async fn logout(&self) {
        if let Err(e) = self.inner.api.logout().await {
            warn!("Logout request failed: {}", e);
        }
        self.inner.expire("logout");
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.inner.api.register(request).await?;
        info!("Registered account for {}", request.email);
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        self.inner.api.forgot_password(email).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let request = PasswordResetRequest {
            token: token.to_string(),
            new_password: new_password.to_string(),
        };
        self.inner.api.reset_password(&request).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Session> {
        let session = self.inner.api.update_profile(update).await?;
        self.inner.refresh(session.clone());
        Ok(session)
    }

    pub async fn update_preferences(&self, preferences: &Preferences) -> Result<Session> {
        let session = self.inner.api.update_preferences(preferences).await?;
        self.inner.refresh(session.clone());
        Ok(session)
    }

    pub async fn export_account(&self) -> Result<Value> {
        self.inner.api.export_account().await
    }

    pub async fn delete_account(&self) -> Result<()> {
        self.inner.api.delete_account().await?;
        self.inner.expire("account deleted");
        Ok(())
    }
}

impl SessionInner {
    fn authenticate(&self, session: Session) {
        let same_user = self
            .state_tx
            .borrow()
            .session()
            .map(|current| current.user_id == session.user_id)
            .unwrap_or(false);
        if !same_user {
            self.api.advance_session_generation();
        }
        self.cookies.store(&session);
        self.state_tx.send_replace(AuthState::Authenticated(session));
    }

    /// Settle the startup check, unless something else resolved the session
    /// first. Returns whether the result was applied.
    fn resolve_check(&self, session: Option<Session>) -> bool {
        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            if !matches!(state, AuthState::Checking) {
                return false;
            }
            applied = true;
            self.api.advance_session_generation();
            *state = match session {
                Some(session) => {
                    self.cookies.store(&session);
                    AuthState::Authenticated(session)
                }
                None => {
                    self.cookies.clear();
                    AuthState::Anonymous
                }
            };
            true
        });
        applied
    }

    /// Expire the session only if it is still the one `generation` names
    fn expire_generation(&self, generation: u64, reason: &str) -> bool {
        let mut was_authenticated = false;
        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            if self.api.session_generation() != generation {
                return false;
            }
            applied = true;
            was_authenticated = state.is_authenticated();
            self.api.advance_session_generation();
            self.cookies.clear();
            let changed = *state != AuthState::Anonymous;
            *state = AuthState::Anonymous;
            changed
        });
        if was_authenticated {
            info!("Session ended: {}", reason);
        }
        applied
    }

    /// Profile changes keep the user; a different user id is not a refresh
    fn refresh(&self, session: Session) {
        let same_user = self
            .state_tx
            .borrow()
            .session()
            .map(|current| current.user_id == session.user_id)
            .unwrap_or(false);
        if same_user {
            self.authenticate(session);
        } else {
            warn!("Ignoring profile update for {} without a matching session", session.user_id);
        }
    }

    fn expire(&self, reason: &str) {
        self.expire_generation(self.api.session_generation(), reason);
    }
}
