use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Normalised one interval OHLCV candle update for an instrument.
///
/// A later update sharing the same `start_time` is a revision of the same candle, not a new
/// candle.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub instrument: SmolStr,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Traded volume in base asset units.
    pub volume: Decimal,
}

impl Candle {
    /// A candle is bullish when it closes above its open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Traded volume denominated in the quote asset (`volume * close`).
    pub fn quote_volume(&self) -> Decimal {
        self.volume * self.close
    }
}
