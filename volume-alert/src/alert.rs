use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Persisted identifier of an [`AlertGroup`].
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, From, Deserialize, Serialize,
)]
pub struct GroupId(pub u64);

/// Two-stage verdict lifecycle of a spike alert for one candle.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStage {
    /// Early warning while the candle is still open.
    #[display("provisional")]
    Provisional,
    /// Confirmed or retracted verdict at candle close.
    #[display("final")]
    Final,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[display("true_signal")]
    TrueSignal,
    #[display("false_signal")]
    FalseSignal,
    #[display("unknown")]
    Unknown,
}

/// Volume spike detected on a single candle.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct SpikeAlert {
    pub instrument: SmolStr,
    pub stage: AlertStage,
    pub verdict: Verdict,
    pub price: Decimal,
    /// Ratio rounded to 2 decimal places, threshold comparisons use the unrounded value.
    pub volume_ratio: Decimal,
    pub quote_volume: Decimal,
    pub average_quote_volume: Decimal,
    pub candle_start_time: DateTime<Utc>,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Burst of related spike alerts for one instrument close together in time.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct AlertGroup {
    pub id: GroupId,
    pub instrument: SmolStr,
    pub first_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    pub alert_count: u32,
    pub max_volume_ratio: Decimal,
    pub max_price: Decimal,
    pub max_quote_volume: Decimal,
    pub active: bool,
}

impl AlertGroup {
    /// Seed a new group from its first alert.
    pub fn seed(id: GroupId, alert: &SpikeAlert) -> Self {
        Self {
            id,
            instrument: alert.instrument.clone(),
            first_time: alert.time,
            last_time: alert.time,
            alert_count: 1,
            max_volume_ratio: alert.volume_ratio,
            max_price: alert.price,
            max_quote_volume: alert.quote_volume,
            active: true,
        }
    }

    /// Fold a further alert into the group. Ratio & quote volume maxima only ever rise, the price
    /// is informational and simply tracks the latest alert.
    pub fn absorb(&mut self, alert: &SpikeAlert) {
        self.alert_count += 1;
        self.last_time = self.last_time.max(alert.time);
        self.max_volume_ratio = self.max_volume_ratio.max(alert.volume_ratio);
        self.max_quote_volume = self.max_quote_volume.max(alert.quote_volume);
        self.max_price = alert.price;
    }
}

/// Fired when an instrument reaches a new high-water mark of consecutive bullish closed candles.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Constructor)]
pub struct ConsecutiveAlert {
    pub instrument: SmolStr,
    pub consecutive_count: u32,
    pub candle_start_time: DateTime<Utc>,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Spike alert that coincided with an active consecutive bullish run.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, Constructor)]
pub struct PriorityAlert {
    pub alert: SpikeAlert,
    pub consecutive_count: u32,
}

/// Outcome of folding a [`SpikeAlert`] into its [`AlertGroup`].
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct AggregatedAlert {
    pub alert: SpikeAlert,
    pub group_id: GroupId,
    /// Number of alerts in the group including this one.
    pub group_count: u32,
    /// True when the alert joined an existing group.
    pub is_grouped: bool,
    pub is_priority: bool,
    pub consecutive_count: Option<u32>,
    pub notified: bool,
}

/// Alerts returned to the caller of the engine for one candle update.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(tag = "alert_type", rename_all = "snake_case")]
pub enum AlertEvent {
    VolumeSpike(AggregatedAlert),
    Consecutive(ConsecutiveAlert),
}

impl AlertEvent {
    pub fn instrument(&self) -> &SmolStr {
        match self {
            AlertEvent::VolumeSpike(aggregated) => &aggregated.alert.instrument,
            AlertEvent::Consecutive(alert) => &alert.instrument,
        }
    }
}
