use super::BybitChannel;
use crate::candle::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Messages received on the Bybit kline stream.
///
/// Anything without a string `topic` (subscription acks, pongs) is [`BybitKlineMessage::Ignore`].
#[derive(Clone, PartialEq, Debug)]
pub enum BybitKlineMessage {
    Ignore,
    Payload(BybitKlinePayload),
}

impl<'de> Deserialize<'de> for BybitKlineMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        match value.get("topic") {
            Some(topic) if topic.is_string() => serde_json::from_value(value)
                .map(BybitKlineMessage::Payload)
                .map_err(serde::de::Error::custom),
            _ => Ok(BybitKlineMessage::Ignore),
        }
    }
}

impl BybitKlineMessage {
    /// Candles carried by the message, empty for ignored messages or foreign topics.
    pub fn into_candles(self) -> Vec<Candle> {
        match self {
            BybitKlineMessage::Ignore => vec![],
            BybitKlineMessage::Payload(payload) => payload.into_candles(),
        }
    }
}

/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/kline>
/// ```json
/// {
///     "topic": "kline.1.BTCUSDT",
///     "data": [
///         {
///             "start": 1672324800000,
///             "end": 1672324859999,
///             "interval": "1",
///             "open": "16649.5",
///             "close": "16677",
///             "high": "16677",
///             "low": "16608",
///             "volume": "2.081",
///             "turnover": "34666.4005",
///             "confirm": false,
///             "timestamp": 1672324988882
///         }
///     ],
///     "ts": 1672324988882,
///     "type": "snapshot"
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BybitKlinePayload {
    pub topic: String,

    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,

    pub data: Vec<BybitKline>,
}

impl BybitKlinePayload {
    /// Symbol parsed from a "kline.<interval>.<symbol>" topic.
    pub fn symbol(&self) -> Option<&str> {
        self.topic
            .strip_prefix(BybitChannel::KLINE_1M.0)
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|symbol| !symbol.is_empty())
    }

    pub fn into_candles(self) -> Vec<Candle> {
        let Some(symbol) = self.symbol().map(SmolStr::new) else {
            return vec![];
        };

        self.data
            .into_iter()
            .map(|kline| kline.into_candle(symbol.clone()))
            .collect()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct BybitKline {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,

    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,

    /// True once the kline is closed by the exchange.
    #[serde(default)]
    pub confirm: bool,
}

impl BybitKline {
    pub fn into_candle(self, instrument: SmolStr) -> Candle {
        Candle {
            instrument,
            start_time: self.start,
            end_time: self.end,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}
