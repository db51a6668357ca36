use super::BASE_URL_REST;
use crate::{candle::Candle, error::AlertError};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use smol_str::SmolStr;
use std::str::FromStr;
use tracing::debug;

/// Maximum klines Bybit returns per REST request.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Bybit `GET /v5/market/kline` response.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/market/kline>
/// ```json
/// {
///     "retCode": 0,
///     "retMsg": "OK",
///     "result": {
///         "symbol": "BTCUSDT",
///         "category": "linear",
///         "list": [
///             ["1670608800000", "17071", "17073", "17027", "17055.5", "268611", "15.74462667"]
///         ]
///     }
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitKlineResponse {
    pub ret_code: i64,
    pub ret_msg: String,
    #[serde(default)]
    pub result: Option<BybitKlineResult>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BybitKlineResult {
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

/// Historical one minute kline fetcher used to seed the baseline before the live feed starts.
#[derive(Debug, Clone)]
pub struct BybitKlineBackfill {
    client: Client,
    base_url: String,
}

impl Default for BybitKlineBackfill {
    fn default() -> Self {
        Self::new(BASE_URL_REST)
    }
}

impl BybitKlineBackfill {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch up to `limit` most recent closed one minute klines for `symbol`, oldest first.
    ///
    /// Requests are paged backwards in [`MAX_KLINES_PER_REQUEST`] steps. The still open kline
    /// Bybit returns first is dropped.
    pub async fn fetch(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>, AlertError> {
        let instrument = SmolStr::new(symbol);
        let mut candles = Vec::with_capacity(limit);
        let mut end: Option<DateTime<Utc>> = None;

        while candles.len() < limit {
            let page_limit = (limit - candles.len()).min(MAX_KLINES_PER_REQUEST);
            let mut page = self.fetch_page(&instrument, page_limit, end).await?;
            let page_len = page.len();

            let Some(oldest) = page.first().map(|candle| candle.start_time) else {
                break;
            };
            end = Some(oldest - Duration::milliseconds(1));

            // Pages are fetched newest first, each page is already oldest first
            page.append(&mut candles);
            candles = page;

            if page_len < page_limit {
                break;
            }
        }

        let candles = closed_candles(candles, Utc::now());
        debug!(%symbol, klines = candles.len(), "kline backfill complete");
        Ok(candles)
    }

    async fn fetch_page(
        &self,
        instrument: &SmolStr,
        limit: usize,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, AlertError> {
        let url = format!("{}/v5/market/kline", self.base_url);
        let mut query = vec![
            ("category", "linear".to_string()),
            ("symbol", instrument.to_string()),
            ("interval", "1".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(end) = end {
            query.push(("end", end.timestamp_millis().to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json::<BybitKlineResponse>()
            .await?;

        parse_kline_response(instrument, response)
    }
}

/// Convert a REST response (rows newest first) into oldest first candles.
pub fn parse_kline_response(
    instrument: &SmolStr,
    response: BybitKlineResponse,
) -> Result<Vec<Candle>, AlertError> {
    if response.ret_code != 0 {
        return Err(AlertError::UpstreamUnavailable(format!(
            "Bybit kline request failed: {} - {}",
            response.ret_code, response.ret_msg
        )));
    }

    response
        .result
        .map(|result| result.list)
        .unwrap_or_default()
        .into_iter()
        .rev()
        .map(|row| parse_kline_row(instrument, &row))
        .collect()
}

/// Keep only klines whose interval has fully elapsed at `now`.
pub fn closed_candles(mut candles: Vec<Candle>, now: DateTime<Utc>) -> Vec<Candle> {
    candles.retain(|candle| candle.start_time + Duration::minutes(1) <= now);
    candles
}

/// Row layout: `[startTime, open, high, low, close, volume, turnover]`.
fn parse_kline_row(instrument: &SmolStr, row: &[String]) -> Result<Candle, AlertError> {
    let [start, open, high, low, close, volume, ..] = row else {
        return Err(AlertError::Deserialise(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    };

    let start_time = start
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| AlertError::Deserialise(format!("invalid kline start time: {start}")))?;

    Ok(Candle {
        instrument: instrument.clone(),
        start_time,
        end_time: start_time + Duration::milliseconds(59_999),
        open: parse_decimal(open)?,
        high: parse_decimal(high)?,
        low: parse_decimal(low)?,
        close: parse_decimal(close)?,
        volume: parse_decimal(volume)?,
    })
}

fn parse_decimal(value: &str) -> Result<Decimal, AlertError> {
    Decimal::from_str(value)
        .map_err(|error| AlertError::Deserialise(format!("invalid decimal {value}: {error}")))
}
