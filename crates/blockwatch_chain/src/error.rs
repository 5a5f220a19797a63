//! Chain access error types.

use std::time::Duration;

use blockwatch_core::ConfigError;

/// Errors that can occur while talking to a chain or observing it.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// HTTP or WebSocket transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered, but not with what the method promises.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The network name is not configured.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Observer settings that cannot run (e.g. zero target blocks).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The push subscription failed or was closed by the remote end.
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Chain id mismatch: configured {expected}, node reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The session was cancelled before reaching its target.
    #[error("Observer session cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured duration on the error.
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChainError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Subscription(err.to_string())
    }
}
