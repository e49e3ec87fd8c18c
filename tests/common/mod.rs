#![allow(dead_code)]

use async_trait::async_trait;
use lolmatch_client::{ClientError, Config, Connector, LolMatchClient, Result};
use lolmatch_client::ws::SocketLink;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

/// Server side of one fake realtime connection. Dropping it disconnects the client.
pub struct FakeSocket {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl FakeSocket {
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.from_client.recv()).await {
            Ok(Some(text)) => Some(serde_json::from_str(&text).expect("client sent invalid JSON")),
            _ => None,
        }
    }

    pub async fn next_frame(&mut self) -> Value {
        self.try_next_frame(WAIT)
            .await
            .expect("no frame from client")
    }

    /// Skip frames until one with the given event name arrives
    pub async fn expect_event(&mut self, name: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["event"] == name {
                return frame;
            }
        }
    }

    pub fn ack(&self, id: &Value, data: Value) {
        let frame = json!({ "ack": id, "data": data });
        self.to_client.send(frame.to_string()).expect("client gone");
    }

    pub fn push(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data });
        self.to_client.send(frame.to_string()).expect("client gone");
    }
}

/// Connector handing the server side of every connection to the test
pub struct FakeConnector {
    sockets: mpsc::UnboundedSender<FakeSocket>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sockets: tx,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<SocketLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::Socket("connection refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.sockets
            .send(FakeSocket {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| ClientError::Socket("test went away".to_string()))?;

        Ok(SocketLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

pub struct Harness {
    pub server: MockServer,
    pub client: LolMatchClient,
    pub connector: Arc<FakeConnector>,
    pub sockets: mpsc::UnboundedReceiver<FakeSocket>,
}

impl Harness {
    pub async fn next_socket(&mut self) -> FakeSocket {
        tokio::time::timeout(WAIT, self.sockets.recv())
            .await
            .expect("client never connected")
            .expect("connector dropped")
    }
}

pub fn test_config(server: &MockServer) -> Config {
    Config {
        api_url: format!("{}/api", server.uri()),
        reconnection_attempts: 3,
        reconnection_delay_ms: 50,
        ack_timeout_ms: 300,
        notification_join_retry_ms: 100,
        notification_refresh_secs: 3600,
        ..Config::default()
    }
}

pub async fn start_with(server: MockServer, config: Config) -> Harness {
    let (connector, sockets) = FakeConnector::new();
    let client = LolMatchClient::start_with_connector(config, connector.clone())
        .expect("client failed to start");
    Harness {
        server,
        client,
        connector,
        sockets,
    }
}

/// Client whose startup session check fails
pub async fn anonymous_client() -> Harness {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/check-session"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Not authenticated"})))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let harness = start_with(server, config).await;
    harness.client.session().bootstrap().await;
    harness
}

/// Client restored as `user_id`, with its first realtime connection handed back
pub async fn signed_in_client(user_id: &str) -> (Harness, FakeSocket) {
    signed_in_client_with(user_id, |_| {}).await
}

pub async fn signed_in_client_with(
    user_id: &str,
    adjust: impl FnOnce(&mut Config),
) -> (Harness, FakeSocket) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/check-session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json(user_id)))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    adjust(&mut config);
    let mut harness = start_with(server, config).await;
    harness.client.session().bootstrap().await;
    let socket = harness.next_socket().await;
    (harness, socket)
}

pub fn session_json(user_id: &str) -> Value {
    json!({
        "userId": user_id,
        "displayName": format!("Player {}", user_id),
        "role": "user",
    })
}

pub fn message_json(id: &str, room_id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "roomId": room_id,
        "senderId": "u2",
        "senderName": "Caps",
        "text": text,
        "createdAt": "2024-05-01T10:00:00Z",
    })
}

pub fn notification_json(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "type": "invitation",
        "status": status,
        "fromUser": {"userId": "u9", "displayName": "Rekkles"},
        "squadId": "s1",
    })
}

/// Poll until `check` holds or fail the test
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
