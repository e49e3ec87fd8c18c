use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Non-success HTTP status with the best message the body offered
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Environment variable error: {0}")]
    Config(#[from] envy::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Well-formed HTTP exchange whose body broke the API contract
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Realtime connection is not established")]
    NotConnected,
    #[error("Acknowledgment timed out")]
    AckTimeout,
    #[error("Connection closed before the acknowledgment arrived")]
    ConnectionClosed,
}

impl ClientError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
