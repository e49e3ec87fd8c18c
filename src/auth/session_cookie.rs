use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::Cookie;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::models::Session;

pub const SESSION_COOKIE_NAME: &str = "lolmatch_session";

/// Short-lived mirror of the in-memory session. Kept in memory and, when a
/// path is configured, written to disk so a restarted client can show who was
/// signed in before the server check finishes.
#[derive(Debug)]
pub struct SessionCookieStore {
    path: Option<PathBuf>,
    ttl: CookieDuration,
    current: Mutex<Option<String>>,
}

impl SessionCookieStore {
    pub fn new(path: Option<PathBuf>, ttl_secs: i64) -> Self {
        Self {
            path,
            ttl: CookieDuration::seconds(ttl_secs),
            current: Mutex::new(None),
        }
    }

    pub fn in_memory(ttl_secs: i64) -> Self {
        Self::new(None, ttl_secs)
    }

    /// Serialize the session into a cookie header value
    pub fn encode(&self, session: &Session) -> Result<String, serde_json::Error> {
        let payload = BASE64.encode(serde_json::to_vec(session)?);
        let cookie = Cookie::build((SESSION_COOKIE_NAME, payload))
            .path("/")
            .max_age(self.ttl)
            .expires(OffsetDateTime::now_utc() + self.ttl)
            .build();
        Ok(cookie.to_string())
    }

    /// Parse a stored cookie. Expired, foreign or malformed cookies yield None.
    pub fn decode(raw: &str) -> Option<Session> {
        let cookie = match Cookie::parse(raw.trim()) {
            Ok(cookie) => cookie,
            Err(e) => {
                warn!("Ignoring malformed session cookie: {}", e);
                return None;
            }
        };

        if cookie.name() != SESSION_COOKIE_NAME {
            return None;
        }

        if let Some(expires) = cookie.expires_datetime() {
            if expires <= OffsetDateTime::now_utc() {
                debug!("Session cookie expired at {}", expires);
                return None;
            }
        }

        let bytes = BASE64.decode(cookie.value()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn store(&self, session: &Session) {
        let raw = match self.encode(session) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode session cookie: {}", e);
                return;
            }
        };

        if let Some(path) = &self.path {
            if let Err(e) = std::fs::write(path, &raw) {
                warn!("Failed to write session cookie to {}: {}", path.display(), e);
            }
        }
        if let Ok(mut current) = self.current.lock() {
            *current = Some(raw);
        }
    }

    pub fn load(&self) -> Option<Session> {
        let in_memory = self.current.lock().ok().and_then(|c| c.clone());
        let raw = match in_memory {
            Some(raw) => raw,
            None => {
                let path = self.path.as_ref()?;
                std::fs::read_to_string(path).ok()?
            }
        };

        let session = Self::decode(&raw);
        if session.is_none() {
            self.clear();
        }
        session
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            current.take();
        }
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed session cookie {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove session cookie {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Preferences, UserRole};

    fn session() -> Session {
        Session {
            user_id: "u1".to_string(),
            display_name: "Faker".to_string(),
            avatar: None,
            role: UserRole::User,
            preferences: Preferences::default(),
        }
    }

    #[test]
    fn test_store_and_load_in_memory() {
        let store = SessionCookieStore::in_memory(3600);
        assert!(store.load().is_none());
        store.store(&session());
        assert_eq!(store.load(), Some(session()));
        store.clear();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_expired_cookie_is_discarded() {
        let store = SessionCookieStore::in_memory(-10);
        store.store(&session());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_foreign_cookie_ignored() {
        assert!(SessionCookieStore::decode("auth_token=abc; Path=/").is_none());
        assert!(SessionCookieStore::decode("lolmatch_session=%%%").is_none());
    }

    #[test]
    fn test_file_backed_cookie_survives_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.cookie");

        SessionCookieStore::new(Some(path.clone()), 3600).store(&session());
        let reopened = SessionCookieStore::new(Some(path.clone()), 3600);
        assert_eq!(reopened.load(), Some(session()));

        reopened.clear();
        assert!(!path.exists());
    }
}
