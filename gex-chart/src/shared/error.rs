use std::time::Duration;
use thiserror::Error;

/// All transport and payload errors generated while feeding the chart engine.
///
/// None of these ever cross the engine's public boundary: transport variants are
/// converted into [`ConnectionState`](crate::shared::connection::ConnectionState)
/// transitions and payload variants are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),

    #[error("transport closed by peer")]
    Closed,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("JSON decode failed: {0}")]
    Decode(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FeedError {
    /// Determine if an error is a transport fault that must drive a connection state
    /// transition, as opposed to a data fault that is dropped and logged.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transport(&self) -> bool {
        match self {
            FeedError::Decode(_) | FeedError::Malformed(_) => false,
            _ => true,
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

/// Reasons a single sample (tick, bar, quote) is rejected at the normalization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SampleError {
    #[error("non-finite or non-positive price: {0}")]
    InvalidPrice(f64),

    #[error("invalid volume: {0}")]
    InvalidVolume(f64),

    #[error("unparseable or negative timestamp")]
    InvalidTimestamp,
}
