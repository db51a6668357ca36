use crate::alert::{AggregatedAlert, ConsecutiveAlert};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Telegram Bot API [`Notifier`].
pub mod telegram;

/// Message handed to a [`Notifier`].
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub enum AlertPayload {
    Spike(AggregatedAlert),
    Consecutive(ConsecutiveAlert),
    System(String),
}

/// Best-effort delivery of alerts to a human channel.
///
/// Returns whether the payload was delivered. Implementations log their own failures, a failed
/// delivery never affects persisted alert state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: &AlertPayload) -> bool;
}

#[async_trait]
impl<T> Notifier for Arc<T>
where
    T: Notifier + ?Sized,
{
    async fn notify(&self, payload: &AlertPayload) -> bool {
        (**self).notify(payload).await
    }
}

/// A disabled (`None`) notifier delivers nothing.
#[async_trait]
impl<T> Notifier for Option<T>
where
    T: Notifier,
{
    async fn notify(&self, payload: &AlertPayload) -> bool {
        match self {
            Some(notifier) => notifier.notify(payload).await,
            None => false,
        }
    }
}

/// Render a payload as Telegram flavoured HTML.
pub fn format_message(payload: &AlertPayload, now: DateTime<Utc>) -> String {
    let time = now.format("%H:%M:%S");

    match payload {
        AlertPayload::Spike(aggregated) => {
            let alert = &aggregated.alert;
            let emoji = spike_emoji(alert.volume_ratio);
            let header = if aggregated.is_priority {
                "PRIORITY VOLUME ALERT"
            } else {
                "VOLUME ALERT"
            };

            let mut message = format!(
                "{emoji} <b>{header}</b>\n\n\
                 💰 <b>Pair:</b> {instrument}\n\
                 💵 <b>Price:</b> ${price}\n\
                 📊 <b>Volume ratio:</b> {ratio}x\n\
                 🏷 <b>Stage:</b> {stage} ({verdict})\n\n\
                 📈 <b>Current volume:</b> ${current}\n\
                 📉 <b>Average volume:</b> ${average}\n",
                instrument = alert.instrument,
                price = alert.price.normalize(),
                ratio = alert.volume_ratio,
                stage = alert.stage,
                verdict = alert.verdict,
                current = alert.quote_volume.round_dp(0),
                average = alert.average_quote_volume.round_dp(0),
            );
            if let Some(count) = aggregated.consecutive_count.filter(|_| aggregated.is_priority) {
                message.push_str(&format!("🔥 <b>Consecutive bullish candles:</b> {count}\n"));
            }
            message.push_str(&format!(
                "\n🕐 <b>Time:</b> {time}\n\n#VolumeAlert #{}",
                hashtag(&alert.instrument)
            ));
            message
        }
        AlertPayload::Consecutive(alert) => format!(
            "🟢 <b>CONSECUTIVE BULLISH CANDLES</b>\n\n\
             💰 <b>Pair:</b> {instrument}\n\
             🔢 <b>Count:</b> {count}\n\n\
             🕐 <b>Time:</b> {time}\n\n#ConsecutiveAlert #{tag}",
            instrument = alert.instrument,
            count = alert.consecutive_count,
            tag = hashtag(&alert.instrument),
        ),
        AlertPayload::System(message) => format!("🤖 <b>System:</b> {message}"),
    }
}

fn spike_emoji(ratio: Decimal) -> &'static str {
    if ratio >= Decimal::from(5) {
        "🚀"
    } else if ratio >= Decimal::from(3) {
        "📈"
    } else {
        "⚡"
    }
}

/// Base asset hashtag, eg/ `XUSDT` -> `X`.
fn hashtag(instrument: &str) -> &str {
    instrument
        .strip_suffix("USDT")
        .filter(|base| !base.is_empty())
        .unwrap_or(instrument)
}
