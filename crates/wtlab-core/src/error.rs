use thiserror::Error;

/// Errors produced by the wtlab session engine.
#[derive(Debug, Error)]
pub enum WtError {
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("stream creation error: {0}")]
    StreamCreation(String),

    #[error("stream read error: {0}")]
    StreamRead(String),

    #[error("stream write error: {0}")]
    StreamWrite(String),

    #[error("datagram error: {0}")]
    Datagram(String),

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for WtError {
    fn from(e: serde_json::Error) -> Self {
        WtError::Bootstrap(format!("malformed fingerprint: {e}"))
    }
}

pub type WtResult<T> = Result<T, WtError>;
