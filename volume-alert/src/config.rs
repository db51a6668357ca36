//! Hot-reloadable analysis configuration.
//!
//! [`AnalysisConfig`] is validated before it ever becomes visible to the engine. The engine takes
//! one [`SharedConfig::load`] snapshot per evaluation, so a concurrent update never changes
//! thresholds halfway through a candle.

use crate::error::AlertError;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, sync::Arc, time::Duration};
use tracing::info;

/// Minimum number of historical bullish candles required before a baseline is trusted.
pub const MIN_BASELINE_SAMPLES: usize = 10;

/// Upper bound for every minute based window (lookback, offset, grouping): 7 days.
pub const MAX_WINDOW_MINUTES: u32 = 7 * 24 * 60;

/// Upper bound for `candle_duration_secs`: 1 day.
pub const MAX_CANDLE_DURATION_SECS: u64 = 24 * 60 * 60;

/// Upper bound for `slot_retention_candles`.
pub const MAX_SLOT_RETENTION_CANDLES: u32 = 1_000;

/// Typed analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Baseline lookback window in hours.
    pub analysis_lookback_hours: u32,
    /// Baseline window end offset before "now", in minutes.
    pub offset_minutes: u32,
    pub volume_multiplier_threshold: Decimal,
    /// Minimum candle quote volume before a candle is considered at all.
    pub min_quote_volume: Decimal,
    pub grouping_window_minutes: u32,
    pub consecutive_threshold: u32,
    pub volume_alerts_enabled: bool,
    pub consecutive_alerts_enabled: bool,
    pub candle_duration_secs: u64,
    /// A candle is "closing" once `candle_duration - closing_grace` has elapsed since it opened.
    pub closing_grace_secs: u64,
    pub baseline_timeout_ms: u64,
    /// Number of candle durations a slot is retained before it is retired as stale.
    pub slot_retention_candles: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_lookback_hours: 1,
            offset_minutes: 0,
            volume_multiplier_threshold: Decimal::TWO,
            min_quote_volume: Decimal::from(1000),
            grouping_window_minutes: 5,
            consecutive_threshold: 5,
            volume_alerts_enabled: true,
            consecutive_alerts_enabled: true,
            candle_duration_secs: 60,
            closing_grace_secs: 2,
            baseline_timeout_ms: 5_000,
            slot_retention_candles: 5,
        }
    }
}

impl AnalysisConfig {
    /// Build from environment variables, falling back to [`Default`] for any absent or
    /// unparsable value.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            analysis_lookback_hours: env_or("ANALYSIS_HOURS", default.analysis_lookback_hours),
            offset_minutes: env_or("OFFSET_MINUTES", default.offset_minutes),
            volume_multiplier_threshold: env_or(
                "VOLUME_MULTIPLIER",
                default.volume_multiplier_threshold,
            ),
            min_quote_volume: env_or("MIN_VOLUME_USDT", default.min_quote_volume),
            grouping_window_minutes: env_or(
                "ALERT_GROUPING_MINUTES",
                default.grouping_window_minutes,
            ),
            consecutive_threshold: env_or("CONSECUTIVE_THRESHOLD", default.consecutive_threshold),
            volume_alerts_enabled: env_or("VOLUME_ALERTS_ENABLED", default.volume_alerts_enabled),
            consecutive_alerts_enabled: env_or(
                "CONSECUTIVE_ALERTS_ENABLED",
                default.consecutive_alerts_enabled,
            ),
            ..default
        }
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        if self.volume_multiplier_threshold <= Decimal::ZERO {
            return Err(AlertError::InvalidConfig(format!(
                "volume_multiplier_threshold must be positive, got {}",
                self.volume_multiplier_threshold
            )));
        }
        if self.min_quote_volume.is_sign_negative() {
            return Err(AlertError::InvalidConfig(format!(
                "min_quote_volume must not be negative, got {}",
                self.min_quote_volume
            )));
        }
        if self.analysis_lookback_hours == 0
            || self.analysis_lookback_hours > MAX_WINDOW_MINUTES / 60
        {
            return Err(AlertError::InvalidConfig(format!(
                "analysis_lookback_hours must be within 1..={}, got {}",
                MAX_WINDOW_MINUTES / 60,
                self.analysis_lookback_hours
            )));
        }
        if self.offset_minutes > MAX_WINDOW_MINUTES {
            return Err(AlertError::InvalidConfig(format!(
                "offset_minutes must be at most {MAX_WINDOW_MINUTES}, got {}",
                self.offset_minutes
            )));
        }
        if self.grouping_window_minutes == 0 || self.grouping_window_minutes > MAX_WINDOW_MINUTES {
            return Err(AlertError::InvalidConfig(format!(
                "grouping_window_minutes must be within 1..={MAX_WINDOW_MINUTES}, got {}",
                self.grouping_window_minutes
            )));
        }
        if self.consecutive_threshold == 0 {
            return Err(AlertError::InvalidConfig(
                "consecutive_threshold must be at least 1".to_string(),
            ));
        }
        if self.candle_duration_secs > MAX_CANDLE_DURATION_SECS {
            return Err(AlertError::InvalidConfig(format!(
                "candle_duration_secs must be at most {MAX_CANDLE_DURATION_SECS}, got {}",
                self.candle_duration_secs
            )));
        }
        if self.closing_grace_secs >= self.candle_duration_secs {
            return Err(AlertError::InvalidConfig(format!(
                "closing_grace_secs ({}) must be below candle_duration_secs ({})",
                self.closing_grace_secs, self.candle_duration_secs
            )));
        }
        if self.slot_retention_candles == 0
            || self.slot_retention_candles > MAX_SLOT_RETENTION_CANDLES
        {
            return Err(AlertError::InvalidConfig(format!(
                "slot_retention_candles must be within 1..={MAX_SLOT_RETENTION_CANDLES}, got {}",
                self.slot_retention_candles
            )));
        }
        Ok(())
    }

    pub fn candle_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.candle_duration_secs as i64)
    }

    /// Elapsed time since candle open after which an update is treated as closing.
    pub fn closing_after(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.candle_duration_secs - self.closing_grace_secs) as i64)
    }

    pub fn slot_retention(&self) -> chrono::Duration {
        self.candle_duration() * self.slot_retention_candles as i32
    }

    pub fn baseline_timeout(&self) -> Duration {
        Duration::from_millis(self.baseline_timeout_ms)
    }

    /// Returns a copy of this config with every field present in `update` overwritten.
    pub fn merged(&self, update: &AnalysisConfigUpdate) -> Self {
        let mut next = self.clone();
        if let Some(value) = update.analysis_lookback_hours {
            next.analysis_lookback_hours = value;
        }
        if let Some(value) = update.offset_minutes {
            next.offset_minutes = value;
        }
        if let Some(value) = update.volume_multiplier_threshold {
            next.volume_multiplier_threshold = value;
        }
        if let Some(value) = update.min_quote_volume {
            next.min_quote_volume = value;
        }
        if let Some(value) = update.grouping_window_minutes {
            next.grouping_window_minutes = value;
        }
        if let Some(value) = update.consecutive_threshold {
            next.consecutive_threshold = value;
        }
        if let Some(value) = update.volume_alerts_enabled {
            next.volume_alerts_enabled = value;
        }
        if let Some(value) = update.consecutive_alerts_enabled {
            next.consecutive_alerts_enabled = value;
        }
        next
    }
}

/// Partial settings update, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnalysisConfigUpdate {
    pub analysis_lookback_hours: Option<u32>,
    pub offset_minutes: Option<u32>,
    pub volume_multiplier_threshold: Option<Decimal>,
    pub min_quote_volume: Option<Decimal>,
    pub grouping_window_minutes: Option<u32>,
    pub consecutive_threshold: Option<u32>,
    pub volume_alerts_enabled: Option<bool>,
    pub consecutive_alerts_enabled: Option<bool>,
}

/// Cloneable handle to the live [`AnalysisConfig`] supporting atomic swaps.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<AnalysisConfig>>>,
}

impl SharedConfig {
    pub fn new(config: AnalysisConfig) -> Result<Self, AlertError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Snapshot of the current configuration.
    pub fn load(&self) -> Arc<AnalysisConfig> {
        self.inner.read().clone()
    }

    /// Validate and atomically install `config`. On error the previous config stays live.
    pub fn replace(&self, config: AnalysisConfig) -> Result<Arc<AnalysisConfig>, AlertError> {
        config.validate()?;
        let config = Arc::new(config);
        *self.inner.write() = Arc::clone(&config);
        info!(?config, "analysis config replaced");
        Ok(config)
    }

    /// Merge a partial update into the current config, validate, then swap.
    pub fn apply(&self, update: &AnalysisConfigUpdate) -> Result<Arc<AnalysisConfig>, AlertError> {
        let mut guard = self.inner.write();
        let next = guard.merged(update);
        next.validate()?;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        info!(config = ?next, "analysis config updated");
        Ok(next)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
