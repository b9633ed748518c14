use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("application with id {0} not found")]
    Lookup(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Never carries the request URL, which embeds bot and client tokens
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("telegram API error (status {status}): {body}")]
    Delivery { status: u16, body: String },

    #[error("parse mode {0} is not supported")]
    UnsupportedDialect(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short machine-friendly label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) | Self::WebSocket(_) => "connection",
            Self::Lookup(_) => "lookup",
            Self::Config(_) => "configuration",
            Self::Serde(_) => "serialization",
            Self::Http(_) | Self::Delivery { .. } => "delivery",
            Self::UnsupportedDialect(_) => "format",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
