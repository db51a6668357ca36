//! # Volume Alert
//! Stateful real-time alert engine for one minute perpetual futures klines.
//!
//! For every candle update the [`AnalysisEngine`] decides whether traded quote volume spiked
//! against a rolling baseline of historical bullish candles (a provisional alert while the candle
//! is open, a confirmed or retracted verdict when it closes), whether the instrument printed a
//! run of consecutive bullish candles, and groups spike alerts into time windows so a burst
//! notifies only once.
//!
//! The engine depends only on the [`BaselineProvider`], [`AlertStore`] & [`Notifier`] traits.
//! [`MemoryStore`] implements the first two, [`TelegramNotifier`] the last. Live candles come
//! from the [`exchange::bybit`] kline feed.

/// Spike, consecutive, priority & aggregated alert types.
pub mod alert;

/// Candle lifecycle tracking, spike & consecutive detection, aggregation and the engine.
pub mod analysis;

/// Normalised OHLCV candle.
pub mod candle;

/// Hot-reloadable [`AnalysisConfig`].
pub mod config;

/// All [`Error`](std::error::Error)s generated in `volume-alert`.
pub mod error;

/// Exchange kline ingestion.
pub mod exchange;

/// [`Notifier`] trait, alert message formatting & Telegram delivery.
pub mod notify;

/// [`BaselineProvider`] & [`AlertStore`] collaborator traits and the in-memory store.
pub mod store;

/// Stream utilities.
pub mod streams;

pub use alert::{
    AggregatedAlert, AlertEvent, AlertGroup, AlertStage, ConsecutiveAlert, GroupId,
    PriorityAlert, SpikeAlert, Verdict,
};
pub use analysis::{
    dispatch::{AnalysedCandle, InstrumentDispatcher},
    engine::AnalysisEngine,
    stats::EngineStats,
};
pub use candle::Candle;
pub use config::{AnalysisConfig, AnalysisConfigUpdate, SharedConfig};
pub use error::AlertError;
pub use notify::{AlertPayload, Notifier, format_message, telegram::TelegramNotifier};
pub use store::{AlertStore, BaselineProvider, memory::MemoryStore};
