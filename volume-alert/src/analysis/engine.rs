use super::{
    aggregator::AlertAggregator,
    consecutive::ConsecutiveRun,
    spike::VolumeSpikeDetector,
    stats::{EngineStats, StatsCounters},
    tracker::CandleTracker,
};
use crate::{
    alert::{AlertEvent, ConsecutiveAlert},
    candle::Candle,
    config::{AnalysisConfig, SharedConfig},
    notify::{AlertPayload, Notifier},
    store::{AlertStore, BaselineProvider},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mutable analysis state owned per instrument.
#[derive(Debug, Default)]
struct InstrumentState {
    tracker: CandleTracker,
    run: ConsecutiveRun,
}

/// Entry point invoked once per incoming candle update.
///
/// Sequences the [`CandleTracker`], [`ConsecutiveRun`], [`VolumeSpikeDetector`] &
/// [`AlertAggregator`] for the candle's instrument. Updates for one instrument are serialised by
/// an async lock held for the whole evaluate-and-persist sequence, different instruments proceed
/// concurrently.
#[derive(Debug)]
pub struct AnalysisEngine<B, S, N> {
    detector: VolumeSpikeDetector<B>,
    aggregator: AlertAggregator<S, N>,
    config: SharedConfig,
    instruments: Mutex<FnvHashMap<SmolStr, Arc<tokio::sync::Mutex<InstrumentState>>>>,
    stats: StatsCounters,
}

impl<B, S, N> AnalysisEngine<B, S, N>
where
    B: BaselineProvider,
    S: AlertStore,
    N: Notifier,
{
    pub fn new(baseline: B, store: S, notifier: N, config: SharedConfig) -> Self {
        Self {
            detector: VolumeSpikeDetector::new(baseline),
            aggregator: AlertAggregator::new(store, notifier),
            config,
            instruments: Mutex::new(FnvHashMap::default()),
            stats: StatsCounters::default(),
        }
    }

    /// Live configuration handle, updates apply from the next candle evaluation.
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.aggregator.store()
    }

    pub fn notifier(&self) -> &N {
        self.aggregator.notifier()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// [`Self::analyse`] using the wall clock.
    pub async fn analyse_now(&self, candle: &Candle) -> Vec<AlertEvent> {
        self.analyse(candle, Utc::now()).await
    }

    /// Analyse one candle update, returning every alert it fired.
    ///
    /// Never fails: upstream errors are logged and the affected step yields no alert, while the
    /// candle lifecycle state is still updated.
    pub async fn analyse(&self, candle: &Candle, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let config = self.config.load();
        let state = self.instrument_state(&candle.instrument);
        let mut state = state.lock().await;
        let InstrumentState { tracker, run } = &mut *state;

        self.stats.record_candle(candle.is_bullish(), now);

        let Some(class) = tracker.classify(candle, now, &config) else {
            return Vec::new();
        };
        debug!(
            instrument = %candle.instrument,
            start_time = %candle.start_time,
            is_new = class.is_new,
            is_closing = class.is_closing,
            "candle classified"
        );

        let mut events = Vec::new();

        // Run advances before the spike step so a closing spike sees the run including itself
        if config.consecutive_alerts_enabled
            && class.is_closing
            && tracker.mark_run_counted(candle.start_time)
        {
            if let Some(alert) = run.evaluate(candle, now, config.consecutive_threshold) {
                if let Some(event) = self.record_consecutive(alert).await {
                    events.push(event);
                }
            }
        }

        if config.volume_alerts_enabled {
            let consecutive_count = (config.consecutive_alerts_enabled
                && run.is_active(config.consecutive_threshold))
            .then(|| run.count());

            if let Some(slot) = tracker.slot_mut(candle.start_time) {
                match self
                    .detector
                    .evaluate(candle, slot, class, now, &config)
                    .await
                {
                    Ok(Some(alert)) => {
                        match self
                            .aggregator
                            .ingest(alert, consecutive_count, config.grouping_window_minutes)
                            .await
                        {
                            Ok(aggregated) => {
                                self.stats.record_spike(aggregated.is_priority);
                                events.push(AlertEvent::VolumeSpike(aggregated));
                            }
                            Err(error) => warn!(
                                instrument = %candle.instrument,
                                %error,
                                "failed to persist volume spike alert"
                            ),
                        }
                    }
                    Ok(None) => {}
                    Err(error) if error.is_no_alert_outcome() => debug!(
                        instrument = %candle.instrument,
                        %error,
                        "no volume alert"
                    ),
                    Err(error) => warn!(
                        instrument = %candle.instrument,
                        %error,
                        "volume analysis aborted"
                    ),
                }
            }
        }

        events
    }

    /// Current snapshot of the configuration used by [`Self::analyse`].
    pub fn current_config(&self) -> Arc<AnalysisConfig> {
        self.config.load()
    }

    async fn record_consecutive(&self, alert: ConsecutiveAlert) -> Option<AlertEvent> {
        if let Err(error) = self.store().save_consecutive_alert(&alert).await {
            warn!(
                instrument = %alert.instrument,
                %error,
                "failed to persist consecutive alert"
            );
            return None;
        }

        info!(
            instrument = %alert.instrument,
            count = alert.consecutive_count,
            "consecutive bullish alert"
        );
        self.stats.record_consecutive();
        self.notifier()
            .notify(&AlertPayload::Consecutive(alert.clone()))
            .await;

        Some(AlertEvent::Consecutive(alert))
    }

    fn instrument_state(&self, instrument: &SmolStr) -> Arc<tokio::sync::Mutex<InstrumentState>> {
        self.instruments
            .lock()
            .entry(instrument.clone())
            .or_default()
            .clone()
    }
}
