use lolmatch_client::{AuthState, Config, ConnectionEvent, LoginOutcome, LolMatchClient};
use lolmatch_client::models::ServerEvent;
use std::panic;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const COMMUNITY_ROOM: &str = "community";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "lolmatch_client=debug,info".into()
        }))
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let client = match LolMatchClient::start(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start client: {}", e);
            std::process::exit(1);
        }
    };

    // Subscribe first so the Connected that follows sign-in is not missed
    let mut events = client.connection().subscribe();

    if let Some(cached) = client.session().cached_session() {
        info!("Last signed in as {}, checking session", cached.display_name);
    }

    if let AuthState::Anonymous = client.session().bootstrap().await {
        let credentials = (
            std::env::var("LOLMATCH_EMAIL").ok(),
            std::env::var("LOLMATCH_PASSWORD").ok(),
        );
        match credentials {
            (Some(email), Some(password)) => match client.session().login(&email, &password, false).await {
                Ok(LoginOutcome::Authenticated(session)) => info!("Signed in as {}", session.display_name),
                Ok(LoginOutcome::TwoFactorRequired { .. }) => {
                    warn!("Account requires two-factor verification, staying anonymous");
                }
                Err(e) => error!("Login failed: {}", e),
            },
            _ => info!("No session and no credentials, running anonymously"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected) => {
                    if client.chat().join_room(COMMUNITY_ROOM).await {
                        let history = client.chat().room_messages(COMMUNITY_ROOM).await;
                        info!("Joined #{} with {} messages", COMMUNITY_ROOM, history.len());
                    }
                }
                Ok(ConnectionEvent::Server(ServerEvent::ReceiveMessage(message))) => {
                    info!(
                        "[{}] {}: {}",
                        message.room_id.as_deref().unwrap_or("?"),
                        message.sender_name.as_deref().unwrap_or(&message.sender_id),
                        message.text
                    );
                }
                Ok(ConnectionEvent::Server(ServerEvent::NewNotification(notification))) => {
                    let pending = client.notifications().pending_count().await;
                    info!("Notification from {} ({} pending)", notification.from_user.display_name, pending);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    client.shutdown();
}
