use crate::{candle::Candle, config::AnalysisConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Lifecycle memory of one candle (`start_time`) for one instrument.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct CandleSlot {
    pub last_seen_is_bullish: bool,
    pub closed: bool,
    pub provisional_sent: bool,
    /// Guards the final verdict so it fires at most once per candle, even under replays.
    pub final_alert_sent: bool,
    /// Guards the consecutive run so a closed candle advances it at most once.
    pub run_counted: bool,
}

/// How an update relates to the candle lifecycle.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Classification {
    /// No slot existed for this `start_time` before this update.
    pub is_new: bool,
    /// `candle_duration - closing_grace` has elapsed since the candle opened.
    pub is_closing: bool,
}

/// Per-instrument candle slots keyed by `start_time`.
///
/// Creating a slot for a newer candle closes every older slot, so at most one slot is open at a
/// time. Slots older than the retention window are retired, updates for them are ignored.
#[derive(Clone, Debug, Default)]
pub struct CandleTracker {
    slots: BTreeMap<DateTime<Utc>, CandleSlot>,
    /// Start time of the newest retired slot, anything at or before it is stale.
    retired_through: Option<DateTime<Utc>>,
}

impl CandleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `candle` & upsert its slot. Returns `None` if the update is for a retired candle.
    pub fn classify(
        &mut self,
        candle: &Candle,
        now: DateTime<Utc>,
        config: &AnalysisConfig,
    ) -> Option<Classification> {
        self.retire(now, config);

        let start_time = candle.start_time;
        if self.retired_through.is_some_and(|retired| start_time <= retired)
            || start_time + config.slot_retention() < now
        {
            debug!(
                instrument = %candle.instrument,
                %start_time,
                "ignoring update for retired candle"
            );
            return None;
        }

        let is_closing = now - start_time >= config.closing_after();
        let is_new = !self.slots.contains_key(&start_time);

        if is_new {
            // Superseded candles can no longer be open
            self.slots
                .range_mut(..start_time)
                .for_each(|(_, slot)| slot.closed = true);
        }

        let slot = self.slots.entry(start_time).or_default();
        slot.last_seen_is_bullish = candle.is_bullish();
        slot.closed |= is_closing;

        Some(Classification { is_new, is_closing })
    }

    pub fn slot(&self, start_time: DateTime<Utc>) -> Option<&CandleSlot> {
        self.slots.get(&start_time)
    }

    pub fn slot_mut(&mut self, start_time: DateTime<Utc>) -> Option<&mut CandleSlot> {
        self.slots.get_mut(&start_time)
    }

    /// Marks the slot as counted towards the consecutive run, returning true the first time only.
    pub fn mark_run_counted(&mut self, start_time: DateTime<Utc>) -> bool {
        match self.slots.get_mut(&start_time) {
            Some(slot) if !slot.run_counted => {
                slot.run_counted = true;
                true
            }
            _ => false,
        }
    }

    pub fn open_slots(&self) -> usize {
        self.slots.values().filter(|slot| !slot.closed).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn retire(&mut self, now: DateTime<Utc>, config: &AnalysisConfig) {
        let retention = config.slot_retention();
        while let Some(entry) = self.slots.first_entry() {
            if *entry.key() + retention >= now {
                break;
            }
            let start_time = *entry.key();
            entry.remove();
            self.retired_through = Some(
                self.retired_through
                    .map_or(start_time, |retired| retired.max(start_time)),
            );
        }
    }
}
