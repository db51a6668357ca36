use super::tracker::{CandleSlot, Classification};
use crate::{
    alert::{AlertStage, SpikeAlert, Verdict},
    candle::Candle,
    config::{AnalysisConfig, MIN_BASELINE_SAMPLES},
    error::AlertError,
    store::BaselineProvider,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

/// Quote volume of a candle measured against its historical baseline.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct VolumeMeasurement {
    pub quote_volume: Decimal,
    pub average_quote_volume: Decimal,
    /// Unrounded ratio, `0` when the average is `0`.
    pub ratio: Decimal,
}

/// Compares live candle volume against the [`BaselineProvider`] and decides the two-stage
/// provisional & final verdicts for each candle slot.
#[derive(Debug, Clone)]
pub struct VolumeSpikeDetector<B> {
    baseline: B,
}

impl<B> VolumeSpikeDetector<B>
where
    B: BaselineProvider,
{
    pub fn new(baseline: B) -> Self {
        Self { baseline }
    }

    pub fn baseline(&self) -> &B {
        &self.baseline
    }

    /// Stage this update could still fire for the slot, if any. Checked before any baseline I/O.
    ///
    /// - Provisional: first non-closing bullish update of the slot.
    /// - Final: first closing update, only when a provisional was sent or the candle closes
    ///   bullish.
    pub fn eligible_stage(
        slot: &CandleSlot,
        class: Classification,
        is_bullish: bool,
    ) -> Option<AlertStage> {
        if class.is_closing {
            (!slot.final_alert_sent && (slot.provisional_sent || is_bullish))
                .then_some(AlertStage::Final)
        } else {
            (!slot.provisional_sent && is_bullish).then_some(AlertStage::Provisional)
        }
    }

    /// Evaluate one candle update, marking the slot guard when an alert fires.
    ///
    /// Returns `Err` for insufficient history, baseline timeouts & upstream failures, all of
    /// which mean "no alert" for this update.
    pub async fn evaluate(
        &self,
        candle: &Candle,
        slot: &mut CandleSlot,
        class: Classification,
        now: DateTime<Utc>,
        config: &AnalysisConfig,
    ) -> Result<Option<SpikeAlert>, AlertError> {
        let Some(stage) = Self::eligible_stage(slot, class, candle.is_bullish()) else {
            return Ok(None);
        };

        let quote_volume = candle.quote_volume();
        if quote_volume < config.min_quote_volume {
            debug!(
                instrument = %candle.instrument,
                %quote_volume,
                "quote volume below minimum"
            );
            return Ok(None);
        }

        let measurement = self.measure(candle, now, config).await?;
        if measurement.ratio < config.volume_multiplier_threshold {
            return Ok(None);
        }

        let verdict = match stage {
            AlertStage::Provisional => {
                slot.provisional_sent = true;
                Verdict::Unknown
            }
            AlertStage::Final => {
                slot.final_alert_sent = true;
                if slot.last_seen_is_bullish {
                    Verdict::TrueSignal
                } else {
                    Verdict::FalseSignal
                }
            }
        };

        let volume_ratio = measurement.ratio.round_dp(2);
        Ok(Some(SpikeAlert {
            instrument: candle.instrument.clone(),
            stage,
            verdict,
            price: candle.close,
            volume_ratio,
            quote_volume: measurement.quote_volume,
            average_quote_volume: measurement.average_quote_volume,
            candle_start_time: candle.start_time,
            time: now,
            message: format!("Volume exceeded {volume_ratio}x average ({stage}, {verdict})"),
        }))
    }

    /// Measure the candle quote volume against the mean of the historical bullish volumes.
    pub async fn measure(
        &self,
        candle: &Candle,
        now: DateTime<Utc>,
        config: &AnalysisConfig,
    ) -> Result<VolumeMeasurement, AlertError> {
        let timeout = config.baseline_timeout();
        let samples = tokio::time::timeout(
            timeout,
            self.baseline.historical_bullish_volumes(
                &candle.instrument,
                config.analysis_lookback_hours,
                config.offset_minutes,
                now,
                candle.start_time,
            ),
        )
        .await
        .map_err(|_| AlertError::BaselineTimeout(timeout))??;

        if samples.len() < MIN_BASELINE_SAMPLES {
            return Err(AlertError::InsufficientHistory {
                samples: samples.len(),
                required: MIN_BASELINE_SAMPLES,
            });
        }

        let quote_volume = candle.quote_volume();
        let average_quote_volume = mean(&samples);
        let ratio = if average_quote_volume.is_zero() {
            Decimal::ZERO
        } else {
            quote_volume
                .checked_div(average_quote_volume)
                .unwrap_or(Decimal::ZERO)
        };

        Ok(VolumeMeasurement {
            quote_volume,
            average_quote_volume,
            ratio,
        })
    }
}

fn mean(samples: &[Decimal]) -> Decimal {
    if samples.is_empty() {
        return Decimal::ZERO;
    }
    let sum = samples
        .iter()
        .fold(Decimal::ZERO, |sum, sample| sum.saturating_add(*sample));
    sum / Decimal::from(samples.len())
}
