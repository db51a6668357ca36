use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use smol_str::SmolStr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use volume_alert::{
    AlertError, AlertEvent, AlertPayload, AlertStage, AnalysisConfig, AnalysisConfigUpdate,
    AnalysisEngine,
    BaselineProvider, Candle, GroupId, MemoryStore, Notifier, SharedConfig, Verdict,
};

#[derive(Debug, Default)]
struct RecordingNotifier {
    payloads: Mutex<Vec<AlertPayload>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.payloads.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, payload: &AlertPayload) -> bool {
        self.payloads.lock().push(payload.clone());
        true
    }
}

/// Baseline that fails while `down` is set, otherwise delegates to the store.
#[derive(Debug)]
struct FlakyBaseline {
    store: Arc<MemoryStore>,
    down: AtomicBool,
}

#[async_trait]
impl BaselineProvider for FlakyBaseline {
    async fn historical_bullish_volumes(
        &self,
        instrument: &str,
        lookback_hours: u32,
        offset_minutes: u32,
        now: DateTime<Utc>,
        exclude_from: DateTime<Utc>,
    ) -> Result<Vec<Decimal>, AlertError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AlertError::UpstreamUnavailable("database down".to_string()));
        }
        self.store
            .historical_bullish_volumes(
                instrument,
                lookback_hours,
                offset_minutes,
                now,
                exclude_from,
            )
            .await
    }
}

type TestEngine = AnalysisEngine<Arc<MemoryStore>, Arc<MemoryStore>, Arc<RecordingNotifier>>;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

fn minute(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(n)
}

fn at(n: i64, seconds: i64) -> DateTime<Utc> {
    minute(n) + Duration::seconds(seconds)
}

// Bullish candles close at 1 (quote volume == volume), bearish at 0.8
fn candle(instrument: &str, n: i64, is_bullish: bool, volume: Decimal) -> Candle {
    let close = if is_bullish { dec!(1) } else { dec!(0.8) };
    Candle {
        instrument: SmolStr::new(instrument),
        start_time: minute(n),
        end_time: minute(n) + Duration::milliseconds(59_999),
        open: dec!(0.9),
        high: dec!(1.05),
        low: dec!(0.75),
        close,
        volume,
    }
}

/// Store seeded with `samples` bullish candles of 1000 quote volume in the hour before minute 0.
fn seeded_store(instrument: &str, samples: i64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    (1..=samples).for_each(|n| store.record_candle(&candle(instrument, -n, true, dec!(1000))));
    store
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        volume_multiplier_threshold: dec!(2.0),
        min_quote_volume: dec!(100),
        grouping_window_minutes: 5,
        ..Default::default()
    }
}

fn engine_with(store: Arc<MemoryStore>, config: AnalysisConfig) -> TestEngine {
    init_logging();
    AnalysisEngine::new(
        Arc::clone(&store),
        store,
        Arc::new(RecordingNotifier::default()),
        SharedConfig::new(config).unwrap(),
    )
}

fn spikes(events: &[AlertEvent]) -> Vec<&volume_alert::AggregatedAlert> {
    events
        .iter()
        .filter_map(|event| match event {
            AlertEvent::VolumeSpike(aggregated) => Some(aggregated),
            AlertEvent::Consecutive(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_provisional_spike_creates_group_and_notifies_once() {
    let engine = engine_with(seeded_store("XUSDT", 10), config());

    let events = engine
        .analyse(&candle("XUSDT", 0, true, dec!(2500)), at(0, 5))
        .await;

    let spikes = spikes(&events);
    assert_eq!(spikes.len(), 1);
    let aggregated = spikes[0];
    assert_eq!(aggregated.alert.stage, AlertStage::Provisional);
    assert_eq!(aggregated.alert.verdict, Verdict::Unknown);
    assert_eq!(aggregated.alert.volume_ratio, dec!(2.5));
    assert_eq!(aggregated.alert.quote_volume, dec!(2500));
    assert_eq!(aggregated.alert.average_quote_volume, dec!(1000));
    assert_eq!(aggregated.group_count, 1);
    assert!(!aggregated.is_grouped);
    assert!(aggregated.notified);

    let group = engine.store().alert_group(aggregated.group_id).unwrap();
    assert_eq!(group.alert_count, 1);
    assert_eq!(engine.notifier().count(), 1);
    assert_eq!(engine.stats().alerts_count, 1);
}

#[tokio::test]
async fn test_second_spike_within_window_reuses_group() {
    let engine = engine_with(seeded_store("XUSDT", 10), config());

    engine
        .analyse(&candle("XUSDT", 0, true, dec!(2500)), at(0, 5))
        .await;
    let events = engine
        .analyse(&candle("XUSDT", 2, true, dec!(4000)), at(2, 5))
        .await;

    let spikes = spikes(&events);
    assert_eq!(spikes.len(), 1);
    assert!(spikes[0].is_grouped);
    assert_eq!(spikes[0].group_id, GroupId(1));
    assert_eq!(spikes[0].group_count, 2);
    assert!(!spikes[0].notified);

    let group = engine.store().alert_group(GroupId(1)).unwrap();
    assert_eq!(group.alert_count, 2);
    assert_eq!(group.max_volume_ratio, dec!(4));
    assert_eq!(group.max_quote_volume, dec!(4000));
    assert_eq!(engine.notifier().count(), 1);
}

#[tokio::test]
async fn test_candle_flipping_bearish_yields_false_signal() {
    let engine = engine_with(seeded_store("XUSDT", 10), config());

    let opening = engine
        .analyse(&candle("XUSDT", 0, true, dec!(3000)), at(0, 5))
        .await;
    assert_eq!(spikes(&opening)[0].alert.stage, AlertStage::Provisional);

    // Closes bearish: 4000 * 0.8 = 3200 quote volume, ratio 3.2
    let closing = engine
        .analyse(&candle("XUSDT", 0, false, dec!(4000)), at(0, 58))
        .await;

    let spikes = spikes(&closing);
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].alert.stage, AlertStage::Final);
    assert_eq!(spikes[0].alert.verdict, Verdict::FalseSignal);
    assert_eq!(spikes[0].alert.volume_ratio, dec!(3.2));
    // Final stage joins the provisional's group and is not re-notified
    assert!(spikes[0].is_grouped);
    assert!(!spikes[0].notified);
    assert_eq!(engine.notifier().count(), 1);
}

#[tokio::test]
async fn test_one_provisional_and_one_final_per_candle_under_replays() {
    let engine = engine_with(seeded_store("XUSDT", 10), config());
    let bullish = candle("XUSDT", 0, true, dec!(3000));

    let mut stages = Vec::new();
    for seconds in [5, 5, 20, 40, 58, 58, 59] {
        let events = engine.analyse(&bullish, at(0, seconds)).await;
        stages.extend(spikes(&events).iter().map(|aggregated| {
            (aggregated.alert.stage, aggregated.alert.verdict)
        }));
    }

    assert_eq!(
        stages,
        vec![
            (AlertStage::Provisional, Verdict::Unknown),
            (AlertStage::Final, Verdict::TrueSignal),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_closing_updates_fire_single_final() {
    let engine = Arc::new(engine_with(seeded_store("XUSDT", 10), config()));
    let bullish = candle("XUSDT", 0, true, dec!(3000));

    let results = join_all((0..16).map(|_| {
        let engine = Arc::clone(&engine);
        let bullish = bullish.clone();
        tokio::spawn(async move { engine.analyse(&bullish, at(0, 59)).await })
    }))
    .await;

    let finals = results
        .into_iter()
        .map(|result| result.unwrap())
        .flat_map(|events| events.into_iter())
        .filter(|event| {
            matches!(event, AlertEvent::VolumeSpike(aggregated) if aggregated.alert.stage == AlertStage::Final)
        })
        .count();
    assert_eq!(finals, 1);
}

#[tokio::test]
async fn test_no_alerts_below_minimum_volume_or_history() {
    struct TestCase {
        samples: i64,
        volume: Decimal,
    }

    let tests = vec![
        TestCase {
            // TC0: quote volume below minimum, huge ratio
            samples: 10,
            volume: dec!(99),
        },
        TestCase {
            // TC1: only 9 baseline samples
            samples: 9,
            volume: dec!(1_000_000),
        },
        TestCase {
            // TC2: no baseline at all
            samples: 0,
            volume: dec!(1_000_000),
        },
    ];

    for (index, test) in tests.into_iter().enumerate() {
        let engine = engine_with(
            seeded_store("XUSDT", test.samples),
            AnalysisConfig {
                // Any ratio passes, only volume or history can reject
                volume_multiplier_threshold: dec!(0.01),
                ..config()
            },
        );

        let events = engine
            .analyse(&candle("XUSDT", 0, true, test.volume), at(0, 5))
            .await;
        assert!(events.is_empty(), "TC{} failed", index);
        assert_eq!(engine.notifier().count(), 0, "TC{} failed", index);
    }
}

#[tokio::test]
async fn test_upstream_failure_yields_no_alert_and_recovers() {
    init_logging();
    let store = seeded_store("XUSDT", 10);
    let baseline = Arc::new(FlakyBaseline {
        store: Arc::clone(&store),
        down: AtomicBool::new(true),
    });
    let engine = AnalysisEngine::new(
        Arc::clone(&baseline),
        store,
        Arc::new(RecordingNotifier::default()),
        SharedConfig::new(config()).unwrap(),
    );
    let bullish = candle("XUSDT", 0, true, dec!(3000));

    assert!(engine.analyse(&bullish, at(0, 5)).await.is_empty());
    assert_eq!(engine.stats().total_candles, 1);

    baseline.down.store(false, Ordering::SeqCst);
    let events = engine.analyse(&bullish, at(0, 10)).await;

    let spikes = spikes(&events);
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].alert.stage, AlertStage::Provisional);
}

#[tokio::test]
async fn test_spike_and_consecutive_returned_together() {
    let engine = engine_with(
        seeded_store("XUSDT", 10),
        AnalysisConfig {
            consecutive_threshold: 3,
            ..config()
        },
    );

    // Two quiet bullish candles build the run
    for n in 0..2 {
        let events = engine
            .analyse(&candle("XUSDT", n, true, dec!(500)), at(n, 59))
            .await;
        assert!(events.is_empty());
    }

    // Third bullish candle closes with a spike
    let events = engine
        .analyse(&candle("XUSDT", 2, true, dec!(2500)), at(2, 59))
        .await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        AlertEvent::Consecutive(alert) => assert_eq!(alert.consecutive_count, 3),
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        AlertEvent::VolumeSpike(aggregated) => {
            assert_eq!(aggregated.alert.stage, AlertStage::Final);
            assert_eq!(aggregated.alert.verdict, Verdict::TrueSignal);
            assert!(aggregated.is_priority);
            assert_eq!(aggregated.consecutive_count, Some(3));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert_eq!(engine.store().consecutive_alerts(10).len(), 1);
    assert_eq!(engine.store().priority_alerts(10).len(), 1);

    let stats = engine.stats();
    assert_eq!(stats.consecutive_alerts_count, 1);
    assert_eq!(stats.priority_alerts_count, 1);
    assert_eq!(stats.alerts_count, 1);
    assert_eq!(stats.total_candles, 3);
    assert_eq!(stats.bullish_candles, 3);
    assert_eq!(stats.last_update, Some(at(2, 59)));

    // Consecutive alert notified, final stage spike of a new group is not
    assert_eq!(engine.notifier().count(), 1);
}

#[tokio::test]
async fn test_bearish_close_resets_run() {
    let engine = engine_with(
        seeded_store("XUSDT", 10),
        AnalysisConfig {
            consecutive_threshold: 2,
            volume_alerts_enabled: false,
            ..config()
        },
    );

    let sequence = [true, true, false, true, true];
    let mut counts = Vec::new();
    for (n, is_bullish) in sequence.into_iter().enumerate() {
        let n = n as i64;
        let events = engine
            .analyse(&candle("XUSDT", n, is_bullish, dec!(10)), at(n, 59))
            .await;
        counts.extend(events.iter().filter_map(|event| match event {
            AlertEvent::Consecutive(alert) => Some(alert.consecutive_count),
            AlertEvent::VolumeSpike(_) => None,
        }));
    }

    assert_eq!(counts, vec![2, 2]);
}

#[tokio::test]
async fn test_instruments_are_independent() {
    let store = seeded_store("XUSDT", 10);
    (1..=10).for_each(|n| store.record_candle(&candle("YUSDT", -n, true, dec!(1000))));
    let engine = engine_with(store, config());

    let x = engine
        .analyse(&candle("XUSDT", 0, true, dec!(2500)), at(0, 5))
        .await;
    let y = engine
        .analyse(&candle("YUSDT", 0, true, dec!(2500)), at(0, 6))
        .await;

    assert_eq!(spikes(&x)[0].group_id, GroupId(1));
    assert_eq!(spikes(&y)[0].group_id, GroupId(2));
    assert!(!spikes(&y)[0].is_grouped);
    assert_eq!(engine.notifier().count(), 2);
}

#[tokio::test]
async fn test_out_of_range_settings_update_is_rejected_and_analysis_continues() {
    let engine = engine_with(seeded_store("XUSDT", 10), config());

    struct TestCase {
        update: AnalysisConfigUpdate,
    }

    let tests = vec![
        TestCase {
            // TC0: lookback overflowing any time window
            update: AnalysisConfigUpdate {
                analysis_lookback_hours: Some(u32::MAX),
                ..Default::default()
            },
        },
        TestCase {
            // TC1: offset overflowing any time window
            update: AnalysisConfigUpdate {
                offset_minutes: Some(u32::MAX),
                ..Default::default()
            },
        },
        TestCase {
            // TC2: grouping window overflowing any time window
            update: AnalysisConfigUpdate {
                grouping_window_minutes: Some(u32::MAX),
                ..Default::default()
            },
        },
    ];

    for (index, test) in tests.into_iter().enumerate() {
        assert!(
            matches!(
                engine.config().apply(&test.update),
                Err(AlertError::InvalidConfig(_))
            ),
            "TC{} failed",
            index
        );
    }
    assert_eq!(engine.current_config().analysis_lookback_hours, 1);

    let events = engine
        .analyse(&candle("XUSDT", 0, true, dec!(2500)), at(0, 5))
        .await;
    assert_eq!(spikes(&events).len(), 1);
    assert_eq!(spikes(&events)[0].alert.volume_ratio, dec!(2.5));
}

#[tokio::test]
async fn test_recorded_revisions_stay_out_of_their_own_baseline() {
    let store = seeded_store("XUSDT", 10);
    let engine = engine_with(Arc::clone(&store), config());

    // Each revision is recorded after analysis, as the live pipeline does
    let first = candle("XUSDT", 0, true, dec!(1500));
    assert!(engine.analyse(&first, at(0, 5)).await.is_empty());
    store.record_candle(&first);

    let second = candle("XUSDT", 0, true, dec!(2500));
    let events = engine.analyse(&second, at(0, 20)).await;
    store.record_candle(&second);

    let spikes = spikes(&events);
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].alert.volume_ratio, dec!(2.5));
    assert_eq!(spikes[0].alert.average_quote_volume, dec!(1000));
}

#[tokio::test]
async fn test_recorded_revision_does_not_complete_short_history() {
    let store = seeded_store("XUSDT", 9);
    let engine = engine_with(Arc::clone(&store), config());

    let first = candle("XUSDT", 0, true, dec!(1500));
    assert!(engine.analyse(&first, at(0, 5)).await.is_empty());
    store.record_candle(&first);

    let second = candle("XUSDT", 0, true, dec!(5000));
    assert!(engine.analyse(&second, at(0, 20)).await.is_empty());
    assert_eq!(engine.stats().alerts_count, 0);
}
