//! Client core of LOL Match: session handling, the REST client, one realtime
//! connection per signed-in user, and the chat, notification and squad
//! synchronizers built on top of them.

pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod ws;

use std::sync::Arc;
use tracing::info;

pub use auth::{AuthState, LoginOutcome, SessionCookieStore, SessionManager};
pub use clients::ApiClient;
pub use config::Config;
pub use error::{ClientError, Result};
pub use services::{ChatService, NotificationService, SquadService};
pub use ws::{ConnectionEvent, ConnectionManager, ConnectionSettings, Connector, TungsteniteConnector};

use utils::TaskGuard;
use ws::PresenceCache;

/// All services of one client instance, created together and torn down together
pub struct LolMatchClient {
    config: Config,
    api: ApiClient,
    session: SessionManager,
    connection: ConnectionManager,
    chat: ChatService,
    notifications: NotificationService,
    squads: SquadService,
    _auth_binding: TaskGuard,
}

impl LolMatchClient {
    /// Wire up the services over a WebSocket transport. Must run inside a
    /// tokio runtime.
    pub fn start(config: Config) -> Result<Self> {
        Self::start_with_connector(config, Arc::new(TungsteniteConnector))
    }

    pub fn start_with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let api = ApiClient::new(&config)?;
        let cookies = SessionCookieStore::new(
            config.session_cookie_path.clone(),
            config.session_cookie_ttl_secs,
        );
        let session = SessionManager::new(api.clone(), cookies);
        let connection = ConnectionManager::new(ConnectionSettings::from_config(&config), connector);

        // Services subscribe before the connection can open
        let chat = ChatService::new(
            api.clone(),
            connection.clone(),
            session.clone(),
            PresenceCache::new(config.presence_ttl()),
        );
        let notifications = NotificationService::new(
            api.clone(),
            connection.clone(),
            session.clone(),
            config.notification_join_retry(),
            config.notification_refresh(),
        );
        let squads = SquadService::new(api.clone(), connection.clone());
        let auth_binding = connection.bind(session.subscribe());

        info!("Client started against {}", config.api_url);
        Ok(Self {
            config,
            api,
            session,
            connection,
            chat,
            notifications,
            squads,
            _auth_binding: auth_binding,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn squads(&self) -> &SquadService {
        &self.squads
    }

    /// Close the realtime connection and stop every background task
    pub fn shutdown(self) {
        self.connection.close();
        info!("Client shut down");
    }
}
