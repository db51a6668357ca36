use super::{BASE_URL_LINEAR, BybitChannel, PING_MESSAGE, kline::BybitKlineMessage, subscribe_requests};
use crate::{
    candle::Candle,
    error::AlertError,
    streams::timeout::{DEFAULT_WS_READ_TIMEOUT, TimeoutStream},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Live kline feed configuration.
#[derive(Debug, Clone)]
pub struct KlineFeedConfig {
    pub url: String,
    pub symbols: Vec<SmolStr>,
    /// Interval between application level `{"op":"ping"}` heartbeats.
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
    /// Idle period after which the connection is considered dead.
    pub read_timeout: Duration,
}

impl KlineFeedConfig {
    pub fn new(symbols: Vec<SmolStr>) -> Self {
        Self {
            url: BASE_URL_LINEAR.to_string(),
            symbols,
            ping_interval: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(5),
            read_timeout: DEFAULT_WS_READ_TIMEOUT,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Exchange connection status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Output of [`run_kline_feed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Candle(Candle),
    Status(ConnectionStatus),
}

/// Connect, subscribe & forward every kline update to `tx`, reconnecting after any terminal
/// error. Returns once the receiving half of `tx` is dropped.
pub async fn run_kline_feed(config: KlineFeedConfig, tx: mpsc::UnboundedSender<FeedEvent>) {
    info!(
        url = %config.url,
        symbols = config.symbols.len(),
        "starting Bybit kline feed"
    );

    loop {
        if tx
            .send(FeedEvent::Status(ConnectionStatus::Reconnecting))
            .is_err()
        {
            break;
        }

        match run_connection(&config, &tx).await {
            Ok(()) => {
                info!("kline event receiver dropped, stopping feed");
                break;
            }
            Err(error) if error.is_terminal() => {
                warn!(%error, "kline connection terminated, will reconnect")
            }
            Err(error) => error!(%error, "kline connection failed, will reconnect"),
        }

        if tx
            .send(FeedEvent::Status(ConnectionStatus::Disconnected))
            .is_err()
        {
            break;
        }

        debug!("waiting {:?} before reconnecting...", config.reconnect_delay);
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Drive a single connection. `Ok` means the consumer went away, `Err` means reconnect.
async fn run_connection(
    config: &KlineFeedConfig,
    tx: &mpsc::UnboundedSender<FeedEvent>,
) -> Result<(), AlertError> {
    let (ws_stream, _) = connect_async(config.url.as_str()).await?;
    let (mut write, read) = ws_stream.split();

    for request in subscribe_requests(BybitChannel::KLINE_1M, &config.symbols) {
        write.send(Message::text(request)).await?;
    }
    info!(symbols = config.symbols.len(), "subscribed to Bybit klines");

    if tx
        .send(FeedEvent::Status(ConnectionStatus::Connected))
        .is_err()
    {
        return Ok(());
    }

    let ping_interval = config.ping_interval;
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if write.send(Message::text(PING_MESSAGE)).await.is_err() {
                debug!("failed to send ping, connection likely dead");
                break;
            }
        }
    });

    let mut read = TimeoutStream::new(read, config.read_timeout);
    let result = loop {
        let message = match read.next().await {
            Some(Ok(message)) => message,
            Some(Err(error)) => break Err(error),
            None => break Err(AlertError::Socket("ConnectionClosed".to_string())),
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<BybitKlineMessage>(&text) {
                Ok(message) => {
                    for candle in message.into_candles() {
                        if tx.send(FeedEvent::Candle(candle)).is_err() {
                            break;
                        }
                    }
                    if tx.is_closed() {
                        break Ok(());
                    }
                }
                Err(error) => {
                    warn!(%error, payload = %text.as_str(), "failed to deserialise Bybit kline message")
                }
            },
            Message::Close(frame) => {
                info!(?frame, "Bybit closed kline connection");
                break Err(AlertError::Socket("ConnectionClosed".to_string()));
            }
            _ => {}
        }
    };

    ping_task.abort();
    result
}
