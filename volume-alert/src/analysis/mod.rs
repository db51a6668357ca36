//! Stateful per-instrument alert analysis.
//!
//! A candle update flows through the [`tracker::CandleTracker`] (lifecycle classification), the
//! [`consecutive::ConsecutiveRun`] (closed candles only) and the [`spike::VolumeSpikeDetector`],
//! before fired spike alerts are grouped by the [`aggregator::AlertAggregator`]. The
//! [`engine::AnalysisEngine`] sequences these steps for each update.

/// Spike alert grouping, persistence & notification.
pub mod aggregator;

/// Consecutive bullish candle run detection.
pub mod consecutive;

/// Per-instrument worker tasks driving the [`engine::AnalysisEngine`].
pub mod dispatch;

/// Orchestrates one candle update through every analysis step.
pub mod engine;

/// Volume ratio measurement & provisional/final stage decisions.
pub mod spike;

/// Engine counters.
pub mod stats;

/// Candle lifecycle slots.
pub mod tracker;
