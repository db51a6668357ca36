use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// All errors generated in `volume-alert`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum AlertError {
    #[error("insufficient baseline history: {samples} samples, {required} required")]
    InsufficientHistory { samples: usize, required: usize },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("baseline query timed out after {0:?}")]
    BaselineTimeout(Duration),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("failed to deserialise: {0}")]
    Deserialise(String),
}

impl AlertError {
    /// Determine if an error is an ordinary "no alert" outcome of an evaluation rather than a
    /// failure worth surfacing above `debug` level.
    pub fn is_no_alert_outcome(&self) -> bool {
        matches!(
            self,
            AlertError::InsufficientHistory { .. } | AlertError::BaselineTimeout(_)
        )
    }

    /// Determine if an error requires the exchange kline feed to re-connect.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            AlertError::Socket(error_msg) => {
                // Socket termination errors require reconnection
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("sendafterclosing")
                    // IO errors often indicate network disconnection
                    || error_lower.contains("io(")
                    // Read timeout indicates silent stream death
                    || error_lower.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AlertError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(format!("{value:?}"))
    }
}

impl From<reqwest::Error> for AlertError {
    fn from(value: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(value.to_string())
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(value: serde_json::Error) -> Self {
        Self::Deserialise(value.to_string())
    }
}
