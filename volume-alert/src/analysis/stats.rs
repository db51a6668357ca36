use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the engine counters.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct EngineStats {
    pub total_candles: u64,
    pub bullish_candles: u64,
    pub alerts_count: u64,
    pub consecutive_alerts_count: u64,
    pub priority_alerts_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    total_candles: AtomicU64,
    bullish_candles: AtomicU64,
    alerts_count: AtomicU64,
    consecutive_alerts_count: AtomicU64,
    priority_alerts_count: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl StatsCounters {
    pub(crate) fn record_candle(&self, is_bullish: bool, now: DateTime<Utc>) {
        self.total_candles.fetch_add(1, Ordering::Relaxed);
        if is_bullish {
            self.bullish_candles.fetch_add(1, Ordering::Relaxed);
        }
        let mut last_update = self.last_update.lock();
        *last_update = Some(last_update.map_or(now, |last| last.max(now)));
    }

    pub(crate) fn record_spike(&self, is_priority: bool) {
        self.alerts_count.fetch_add(1, Ordering::Relaxed);
        if is_priority {
            self.priority_alerts_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_consecutive(&self) {
        self.consecutive_alerts_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            total_candles: self.total_candles.load(Ordering::Relaxed),
            bullish_candles: self.bullish_candles.load(Ordering::Relaxed),
            alerts_count: self.alerts_count.load(Ordering::Relaxed),
            consecutive_alerts_count: self.consecutive_alerts_count.load(Ordering::Relaxed),
            priority_alerts_count: self.priority_alerts_count.load(Ordering::Relaxed),
            last_update: *self.last_update.lock(),
        }
    }
}
