use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use crate::error::ClientError;

/// Client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the backend REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Realtime endpoint, derived from `api_url` when absent
    pub socket_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Reconnection attempts before the connection manager gives up
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Retry interval for the per-user notification room join
    #[serde(default = "default_notification_join_retry_ms")]
    pub notification_join_retry_ms: u64,

    #[serde(default = "default_notification_refresh_secs")]
    pub notification_refresh_secs: u64,

    /// How long an online/offline status stays valid without a refresh
    #[serde(default = "default_presence_ttl_secs")]
    pub presence_ttl_secs: u64,

    /// File the session cookie is mirrored into. Memory only when absent.
    pub session_cookie_path: Option<PathBuf>,

    #[serde(default = "default_session_cookie_ttl_secs")]
    pub session_cookie_ttl_secs: i64,

    /// Capacity of the connection event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ClientError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded for {}", config.api_url);
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ClientError::Config(e))
            }
        }
    }

    /// Realtime endpoint. Without an explicit `SOCKET_URL` the API origin is
    /// reused with a ws scheme and a trailing `/api` segment stripped.
    pub fn socket_endpoint(&self) -> String {
        if let Some(url) = &self.socket_url {
            return url.clone();
        }

        let base = self.api_url.trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);
        let origin = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", origin)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn notification_join_retry(&self) -> Duration {
        Duration::from_millis(self.notification_join_retry_ms)
    }

    pub fn notification_refresh(&self) -> Duration {
        Duration::from_secs(self.notification_refresh_secs)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            notification_join_retry_ms: default_notification_join_retry_ms(),
            notification_refresh_secs: default_notification_refresh_secs(),
            presence_ttl_secs: default_presence_ttl_secs(),
            session_cookie_path: None,
            session_cookie_ttl_secs: default_session_cookie_ttl_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

// Default value functions
fn default_api_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_reconnection_attempts() -> u32 {
    5
}

fn default_reconnection_delay_ms() -> u64 {
    1_000
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_notification_join_retry_ms() -> u64 {
    3_000
}

fn default_notification_refresh_secs() -> u64 {
    60
}

fn default_presence_ttl_secs() -> u64 {
    5 * 60
}

fn default_session_cookie_ttl_secs() -> i64 {
    60 * 60
}

fn default_event_buffer() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_endpoint_derived_from_api_url() {
        let config = Config {
            api_url: "https://lolmatch.gg/api/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.socket_endpoint(), "wss://lolmatch.gg/ws");

        let config = Config::default();
        assert_eq!(config.socket_endpoint(), "ws://localhost:3000/ws");
    }

    #[test]
    fn test_explicit_socket_url_wins() {
        let config = Config {
            socket_url: Some("ws://realtime:4000/socket".to_string()),
            ..Config::default()
        };
        assert_eq!(config.socket_endpoint(), "ws://realtime:4000/socket");
    }
}
