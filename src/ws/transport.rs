use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use crate::error::{ClientError, Result};

/// Text channel pair for one live connection. The connection is over once
/// `incoming` yields `None`; dropping `outgoing` closes it from our side.
pub struct SocketLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens realtime connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SocketLink>;
}

/// WebSocket transport
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<SocketLink> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Socket(e.to_string()))?;
        info!("WebSocket connected to {}", url);

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Writer task: forward outgoing frames until the link is dropped
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(Message::text(text)).await {
                    error!("Failed to send WebSocket frame: {}", e);
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
            debug!("WebSocket writer finished");
        });

        // Reader task: forward text frames until close or error
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(SocketLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
