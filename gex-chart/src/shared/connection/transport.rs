//! Transport seams for the connection manager
//!
//! Each transport returns raw payload text; parsing happens at the
//! [`wire`](crate::shared::wire) boundary so every source is normalized the same way.

use crate::shared::{
    config::{ConnectionConfig, endpoint_for},
    connection::timeout::TimeoutStream,
    error::FeedError,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt, stream::BoxStream};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

/// Live push payloads. Ends, or yields an error, when the transport drops.
pub type PushStream = BoxStream<'static, Result<String, FeedError>>;

#[async_trait]
pub trait PushTransport: Send {
    /// Open a live subscription for `symbol`. Dropping the stream closes the transport.
    async fn connect(&mut self, symbol: &str) -> Result<PushStream, FeedError>;
}

#[async_trait]
pub trait PollTransport: Send + Sync {
    /// One pull of the polling fallback endpoint
    async fn poll(&self, symbol: &str) -> Result<String, FeedError>;
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Historical bars for `symbol`, raw response body
    async fn fetch(&self, symbol: &str) -> Result<String, FeedError>;
}

/// WebSocket push transport with keep-alive pings and an idle read timeout
#[derive(Debug, Clone)]
pub struct WsPushTransport {
    url: String,
    ping_interval: Duration,
    read_timeout: Duration,
}

impl WsPushTransport {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            url: config.ws_url.clone(),
            ping_interval: config.ping_interval,
            read_timeout: config.read_timeout,
        }
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&mut self, symbol: &str) -> Result<PushStream, FeedError> {
        let url = endpoint_for(&self.url, symbol);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|error| FeedError::Connect {
                url: url.clone(),
                reason: error.to_string(),
            })?;
        info!(%url, symbol, "push transport connected");

        let (mut write, read) = ws_stream.split();
        let subscribe = serde_json::json!({ "type": "subscribe", "symbol": symbol });
        write.send(Message::Text(subscribe.to_string().into())).await?;

        // Ping task owns the writer; it stops once the read stream (holding the sender) is dropped
        let ping_interval = self.ping_interval;
        let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                            debug!("failed to send ping, connection likely dead");
                            break;
                        }
                    }
                    _ = ping_shutdown_rx.recv() => {
                        debug!("push transport released, closing socket");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let messages = read.filter_map(move |message| {
            let _ping_guard = &ping_shutdown_tx;
            let item = match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(Message::Close(frame)) => {
                    info!(?frame, "server closed push connection");
                    Some(Err(FeedError::Closed))
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(error) => Some(Err(FeedError::from(error))),
            };
            futures::future::ready(item)
        });

        Ok(TimeoutStream::new(messages.boxed(), self.read_timeout).boxed())
    }
}

/// HTTP polling fallback
#[derive(Debug, Clone)]
pub struct HttpPollTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpPollTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PollTransport for HttpPollTransport {
    async fn poll(&self, symbol: &str) -> Result<String, FeedError> {
        let url = endpoint_for(&self.url, symbol);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// HTTP historical bars fetch
#[derive(Debug, Clone)]
pub struct HttpHistorySource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpHistorySource {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.history_url.clone(),
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch(&self, symbol: &str) -> Result<String, FeedError> {
        let url = endpoint_for(&self.url, symbol);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    FeedError::RequestTimeout(self.timeout)
                } else {
                    FeedError::from(error)
                }
            })?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}
