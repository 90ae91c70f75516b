use crate::{feed::FeedKey, store::SeriesKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `tidehunter-data`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("unsupported timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("malformed alert key: {0}")]
    InvalidAlertKey(String),

    #[error("invalid alert definition: {0}")]
    InvalidAlert(String),

    #[error("alert not registered: {0}")]
    AlertNotFound(String),

    #[error(
        "\
        OutOfOrderWrite: {key} received bucket {received} which does not follow on from \
        the latest bucket {latest} \
    "
    )]
    OutOfOrderWrite {
        key: SeriesKey,
        latest: i64,
        received: i64,
    },

    #[error("series already seeded: {0}")]
    AlreadySeeded(SeriesKey),

    #[error("subscription {key} failed: {reason}")]
    SubscriptionFailure { key: FeedKey, reason: String },

    #[error("failed to deliver notification: {0}")]
    DownstreamSendFailure(String),

    #[error("HttpError: {0}")]
    Http(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("alert repository unavailable: {0}")]
    Repository(String),

    #[error("failed to deserialise payload: {error} (payload: {payload})")]
    Deserialise { error: String, payload: String },
}

impl DataError {
    /// Determine if an error requires a live kline stream to be re-established.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            DataError::SubscriptionFailure { .. } => true,
            DataError::Socket(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connectionclosed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("sendafterclosing")
                    || error_lower.contains("io(")
                    || error_lower.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(format!("{error:?}"))
    }
}
