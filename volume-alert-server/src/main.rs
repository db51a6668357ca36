use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    time::interval,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use volume_alert::{
    AlertEvent, AlertPayload, AnalysedCandle, AnalysisConfig, AnalysisConfigUpdate,
    AnalysisEngine, Candle, EngineStats, InstrumentDispatcher, MemoryStore, Notifier,
    SharedConfig, TelegramNotifier,
    exchange::bybit::{
        BASE_URL_LINEAR, BASE_URL_REST,
        backfill::BybitKlineBackfill,
        stream::{ConnectionStatus, FeedEvent, KlineFeedConfig, run_kline_feed},
    },
};

type Engine = AnalysisEngine<Arc<MemoryStore>, Arc<MemoryStore>, Option<TelegramNotifier>>;

const DEFAULT_WATCHLIST: &str = "BTCUSDT,ETHUSDT,SOLUSDT";
const DEFAULT_BACKFILL_LIMIT: usize = 1440;
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Server settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
struct ServerConfig {
    addr: SocketAddr,
    buffer_size: usize,
    ws_url: String,
    rest_url: String,
    watchlist: Vec<SmolStr>,
    /// One minute klines fetched per symbol on startup.
    backfill_limit: usize,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let addr = lookup("WS_ADDR")
            .and_then(|value| value.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 9001)));

        let buffer_size = lookup("WS_BUFFER_SIZE")
            .and_then(|value| value.parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(10_000);

        let watchlist = parse_watchlist(
            lookup("WATCHLIST")
                .as_deref()
                .unwrap_or(DEFAULT_WATCHLIST),
        );

        Self {
            addr,
            buffer_size,
            ws_url: lookup("BYBIT_WS_URL").unwrap_or_else(|| BASE_URL_LINEAR.to_string()),
            rest_url: lookup("BYBIT_REST_URL").unwrap_or_else(|| BASE_URL_REST.to_string()),
            watchlist,
            backfill_limit: lookup("BACKFILL_LIMIT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_BACKFILL_LIMIT),
        }
    }
}

/// Parse a comma separated symbol list, upper-cased with blanks and duplicates removed.
fn parse_watchlist(input: &str) -> Vec<SmolStr> {
    let mut symbols: Vec<SmolStr> = Vec::new();
    for symbol in input.split(',').map(str::trim).filter(|symbol| !symbol.is_empty()) {
        let symbol = SmolStr::new(symbol.to_uppercase());
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

/// Messages pushed to dashboard clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Welcome {
        message: String,
        timestamp: DateTime<Utc>,
    },
    KlineUpdate {
        symbol: SmolStr,
        data: Candle,
        alerts: Vec<AlertEvent>,
        timestamp: DateTime<Utc>,
    },
    ConnectionStatus {
        status: ConnectionStatus,
        timestamp: DateTime<Utc>,
    },
    SettingsUpdated {
        settings: AnalysisConfig,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Stats {
        stats: EngineStats,
    },
    Settings {
        settings: AnalysisConfig,
    },
    Error {
        message: String,
    },
}

impl From<AnalysedCandle> for ServerMessage {
    fn from((candle, alerts): AnalysedCandle) -> Self {
        Self::KlineUpdate {
            symbol: candle.instrument.clone(),
            data: candle,
            alerts,
            timestamp: Utc::now(),
        }
    }
}

/// Messages received from dashboard clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    GetStats,
    GetSettings,
    UpdateSettings { settings: AnalysisConfigUpdate },
}

/// Where a response to a [`ClientMessage`] is delivered.
#[derive(Debug, Clone)]
enum Reply {
    Client(ServerMessage),
    Broadcast(ServerMessage),
}

fn handle_client_message(text: &str, engine: &Engine) -> Reply {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            return Reply::Client(ServerMessage::Error {
                message: format!("invalid message: {error}"),
            });
        }
    };

    match message {
        ClientMessage::Ping => Reply::Client(ServerMessage::Pong {
            timestamp: Utc::now(),
        }),
        ClientMessage::GetStats => Reply::Client(ServerMessage::Stats {
            stats: engine.stats(),
        }),
        ClientMessage::GetSettings => Reply::Client(ServerMessage::Settings {
            settings: engine.current_config().as_ref().clone(),
        }),
        ClientMessage::UpdateSettings { settings } => match engine.config().apply(&settings) {
            Ok(config) => Reply::Broadcast(ServerMessage::SettingsUpdated {
                settings: config.as_ref().clone(),
            }),
            Err(error) => {
                warn!(%error, "rejected settings update");
                Reply::Client(ServerMessage::Error {
                    message: error.to_string(),
                })
            }
        },
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let server = ServerConfig::from_env();
    let analysis = match SharedConfig::new(AnalysisConfig::from_env()) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid analysis configuration");
            return;
        }
    };
    info!(?server, config = ?analysis.load(), "starting volume alert server");

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(AnalysisEngine::new(
        Arc::clone(&store),
        Arc::clone(&store),
        TelegramNotifier::from_env(),
        analysis,
    ));

    // Create broadcast channel for dashboard messages
    let (tx, _rx) = broadcast::channel::<ServerMessage>(server.buffer_size);
    let tx = Arc::new(tx);

    backfill_history(&server, &store).await;

    tokio::spawn(start_websocket_server(
        server.addr,
        Arc::clone(&tx),
        Arc::clone(&engine),
    ));

    let (candle_tx, candle_rx) = mpsc::unbounded_channel();
    let (analysed_tx, analysed_rx) = mpsc::unbounded_channel();
    tokio::spawn(InstrumentDispatcher::new(Arc::clone(&engine), analysed_tx).run(candle_rx));
    tokio::spawn(publish_analysed(analysed_rx, Arc::clone(&store), Arc::clone(&tx)));

    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_kline_feed(
        KlineFeedConfig::new(server.watchlist.clone()).with_url(server.ws_url.clone()),
        feed_tx,
    ));
    tokio::spawn(route_feed_events(feed_rx, candle_tx, Arc::clone(&tx)));
    tokio::spawn(prune_history(Arc::clone(&store), Arc::clone(&engine)));

    engine
        .notifier()
        .notify(&AlertPayload::System("Volume alert engine started".to_string()))
        .await;

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }

    info!("shutting down volume alert server");
    engine
        .notifier()
        .notify(&AlertPayload::System("Volume alert engine stopped".to_string()))
        .await;
}

/// Kline history needed to serve the baseline window plus the retained candle slots.
fn history_window(config: &AnalysisConfig) -> chrono::Duration {
    chrono::Duration::hours(config.analysis_lookback_hours as i64)
        + chrono::Duration::minutes(config.offset_minutes as i64)
        + config.slot_retention()
}

/// Seed the store with recent klines so baselines are available immediately.
async fn backfill_history(server: &ServerConfig, store: &MemoryStore) {
    let backfill = BybitKlineBackfill::new(server.rest_url.as_str());

    for symbol in &server.watchlist {
        match backfill.fetch(symbol, server.backfill_limit).await {
            Ok(candles) => {
                for candle in &candles {
                    store.record_candle(candle);
                }
                info!(%symbol, klines = candles.len(), "kline history loaded");
            }
            Err(error) => warn!(%symbol, %error, "failed to load kline history"),
        }
    }
}

/// Forward feed candles to the dispatcher and connection status to dashboard clients.
async fn route_feed_events(
    mut feed_rx: mpsc::UnboundedReceiver<FeedEvent>,
    candle_tx: mpsc::UnboundedSender<Candle>,
    tx: Arc<broadcast::Sender<ServerMessage>>,
) {
    while let Some(event) = feed_rx.recv().await {
        match event {
            FeedEvent::Candle(candle) => {
                if candle_tx.send(candle).is_err() {
                    error!("instrument dispatcher stopped, dropping kline feed");
                    break;
                }
            }
            FeedEvent::Status(status) => {
                info!(?status, "exchange connection status");
                let _ = tx.send(ServerMessage::ConnectionStatus {
                    status,
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

/// Persist each analysed candle, then broadcast it with its alerts.
async fn publish_analysed(
    mut analysed_rx: mpsc::UnboundedReceiver<AnalysedCandle>,
    store: Arc<MemoryStore>,
    tx: Arc<broadcast::Sender<ServerMessage>>,
) {
    while let Some(analysed) = analysed_rx.recv().await {
        // Recorded after analysis, the baseline excludes the candle under evaluation
        store.record_candle(&analysed.0);

        if !analysed.1.is_empty() {
            info!(
                instrument = %analysed.0.instrument,
                alerts = analysed.1.len(),
                "alerts fired"
            );
        }

        let _ = tx.send(ServerMessage::from(analysed));
    }
}

async fn prune_history(store: Arc<MemoryStore>, engine: Arc<Engine>) {
    let mut ticker = interval(PRUNE_INTERVAL);
    loop {
        ticker.tick().await;
        let window = history_window(&engine.current_config());
        let Some(before) = Utc::now().checked_sub_signed(window) else {
            warn!(?window, "kline history window out of range, skipping prune");
            continue;
        };
        store.prune_candles(before);
        debug!(%before, "pruned kline history");
    }
}

/// Start WebSocket server that pushes dashboard messages to connected clients
async fn start_websocket_server(
    addr: SocketAddr,
    tx: Arc<broadcast::Sender<ServerMessage>>,
    engine: Arc<Engine>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "failed to bind WebSocket server");
            return;
        }
    };

    info!("WebSocket server bound to {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(
            stream,
            peer_addr,
            Arc::clone(&tx),
            Arc::clone(&engine),
        ));
    }
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tx: Arc<broadcast::Sender<ServerMessage>>,
    engine: Arc<Engine>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = tx.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let welcome = ServerMessage::Welcome {
        message: "Connected to volume alert feed".to_string(),
        timestamp: Utc::now(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = ws_sender.send(Message::text(json)).await;
    }

    // Forward broadcasts and direct replies to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                result = rx.recv() => match result {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcast channel closed for {}", peer_addr);
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(message) => message,
                    None => break,
                },
            };

            match serde_json::to_string(&message) {
                Ok(json) => {
                    if ws_sender.send(Message::text(json)).await.is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "failed to serialise dashboard message"),
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Text(text)) => {
                    debug!("Received text from {}: {}", peer_addr, text.as_str());
                    match handle_client_message(text.as_str(), &engine) {
                        Reply::Client(message) => {
                            if reply_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Reply::Broadcast(message) => {
                            let _ = tx.send(message);
                        }
                    }
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            info!("Send task completed for {}", peer_addr);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            info!("Receive task completed for {}", peer_addr);
            send_task.abort();
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
