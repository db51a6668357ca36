use super::{AlertStore, BaselineProvider};
use crate::{
    alert::{AlertGroup, ConsecutiveAlert, GroupId, PriorityAlert, SpikeAlert},
    candle::Candle,
    error::AlertError,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

/// Kline history entry kept for baseline queries.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct StoredCandle {
    quote_volume: Decimal,
    is_bullish: bool,
}

/// Spike alert persisted inside its [`AlertGroup`].
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct StoredAlert {
    pub group_id: GroupId,
    pub alert: SpikeAlert,
}

#[derive(Debug, Default)]
struct MemoryState {
    candles: FnvHashMap<SmolStr, BTreeMap<DateTime<Utc>, StoredCandle>>,
    groups: BTreeMap<GroupId, AlertGroup>,
    alerts: Vec<StoredAlert>,
    consecutive: Vec<ConsecutiveAlert>,
    priority: Vec<PriorityAlert>,
}

/// Thread safe in-memory kline history & alert store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    next_group_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a candle by `(instrument, start_time)`, a revision overwrites the previous values.
    pub fn record_candle(&self, candle: &Candle) {
        self.state
            .write()
            .candles
            .entry(candle.instrument.clone())
            .or_default()
            .insert(
                candle.start_time,
                StoredCandle {
                    quote_volume: candle.quote_volume(),
                    is_bullish: candle.is_bullish(),
                },
            );
    }

    /// Drop kline history opened before `before`.
    pub fn prune_candles(&self, before: DateTime<Utc>) {
        let mut state = self.state.write();
        for history in state.candles.values_mut() {
            *history = history.split_off(&before);
        }
        state.candles.retain(|_, history| !history.is_empty());
    }

    pub fn candle_count(&self, instrument: &str) -> usize {
        self.state
            .read()
            .candles
            .get(instrument)
            .map(BTreeMap::len)
            .unwrap_or_default()
    }

    /// Active groups, most recently updated first.
    pub fn alert_groups(&self, limit: usize) -> Vec<AlertGroup> {
        let state = self.state.read();
        let mut groups = state
            .groups
            .values()
            .filter(|group| group.active)
            .cloned()
            .collect::<Vec<_>>();
        groups.sort_by(|a, b| b.last_time.cmp(&a.last_time));
        groups.truncate(limit);
        groups
    }

    pub fn alert_group(&self, group_id: GroupId) -> Option<AlertGroup> {
        self.state.read().groups.get(&group_id).cloned()
    }

    /// Alerts of a group, newest first.
    pub fn alerts_in_group(&self, group_id: GroupId) -> Vec<SpikeAlert> {
        self.state
            .read()
            .alerts
            .iter()
            .rev()
            .filter(|stored| stored.group_id == group_id)
            .map(|stored| stored.alert.clone())
            .collect()
    }

    pub fn consecutive_alerts(&self, limit: usize) -> Vec<ConsecutiveAlert> {
        self.state
            .read()
            .consecutive
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn priority_alerts(&self, limit: usize) -> Vec<PriorityAlert> {
        self.state
            .read()
            .priority
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Soft delete a group. Returns false if the group does not exist.
    pub fn deactivate_group(&self, group_id: GroupId) -> bool {
        match self.state.write().groups.get_mut(&group_id) {
            Some(group) => {
                group.active = false;
                true
            }
            None => false,
        }
    }

    /// Soft delete every group.
    pub fn clear_alerts(&self) {
        self.state
            .write()
            .groups
            .values_mut()
            .for_each(|group| group.active = false);
    }
}

#[async_trait]
impl BaselineProvider for MemoryStore {
    async fn historical_bullish_volumes(
        &self,
        instrument: &str,
        lookback_hours: u32,
        offset_minutes: u32,
        now: DateTime<Utc>,
        exclude_from: DateTime<Utc>,
    ) -> Result<Vec<Decimal>, AlertError> {
        let end =
            checked_before(now, Duration::minutes(offset_minutes as i64))?.min(exclude_from);
        let start = checked_before(end, Duration::hours(lookback_hours as i64))?;
        if start >= end {
            return Ok(vec![]);
        }

        Ok(self
            .state
            .read()
            .candles
            .get(instrument)
            .map(|history| {
                history
                    .range(start..end)
                    .filter(|(_, candle)| candle.is_bullish)
                    .map(|(_, candle)| candle.quote_volume)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn active_alert_group(
        &self,
        instrument: &str,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertGroup>, AlertError> {
        let threshold = checked_before(now, Duration::minutes(window_minutes as i64))?;

        Ok(self
            .state
            .read()
            .groups
            .values()
            .filter(|group| {
                group.active && group.instrument == instrument && group.last_time >= threshold
            })
            .max_by_key(|group| group.last_time)
            .cloned())
    }

    async fn create_alert_group(&self, alert: &SpikeAlert) -> Result<GroupId, AlertError> {
        let group_id = GroupId(self.next_group_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.state
            .write()
            .groups
            .insert(group_id, AlertGroup::seed(group_id, alert));
        Ok(group_id)
    }

    async fn update_alert_group(
        &self,
        group_id: GroupId,
        alert: &SpikeAlert,
    ) -> Result<(), AlertError> {
        match self.state.write().groups.get_mut(&group_id) {
            Some(group) => {
                group.absorb(alert);
                Ok(())
            }
            None => Err(AlertError::UpstreamUnavailable(format!(
                "unknown alert group: {group_id}"
            ))),
        }
    }

    async fn append_alert(&self, group_id: GroupId, alert: &SpikeAlert) -> Result<(), AlertError> {
        let mut state = self.state.write();
        if !state.groups.contains_key(&group_id) {
            return Err(AlertError::UpstreamUnavailable(format!(
                "unknown alert group: {group_id}"
            )));
        }
        state.alerts.push(StoredAlert {
            group_id,
            alert: alert.clone(),
        });
        Ok(())
    }

    async fn save_consecutive_alert(&self, alert: &ConsecutiveAlert) -> Result<(), AlertError> {
        self.state.write().consecutive.push(alert.clone());
        Ok(())
    }

    async fn save_priority_alert(&self, alert: &PriorityAlert) -> Result<(), AlertError> {
        self.state.write().priority.push(alert.clone());
        Ok(())
    }
}

/// `time - span`, or an error when the result is outside the representable range.
fn checked_before(time: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>, AlertError> {
    time.checked_sub_signed(span).ok_or_else(|| {
        AlertError::UpstreamUnavailable(format!("time window {span} before {time} is out of range"))
    })
}
