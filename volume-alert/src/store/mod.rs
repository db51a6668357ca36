use crate::{
    alert::{AlertGroup, ConsecutiveAlert, GroupId, PriorityAlert, SpikeAlert},
    error::AlertError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// In-memory [`BaselineProvider`] & [`AlertStore`].
pub mod memory;

/// Source of historical bullish candle quote volumes used as the spike baseline.
#[async_trait]
pub trait BaselineProvider: Send + Sync {
    /// Quote volumes of bullish candles opened within
    /// `[now - offset_minutes - lookback_hours, now - offset_minutes)`.
    ///
    /// Candles opened at or after `exclude_from` are never sampled, so the candle under
    /// evaluation and its earlier revisions stay out of its own baseline.
    async fn historical_bullish_volumes(
        &self,
        instrument: &str,
        lookback_hours: u32,
        offset_minutes: u32,
        now: DateTime<Utc>,
        exclude_from: DateTime<Utc>,
    ) -> Result<Vec<Decimal>, AlertError>;
}

/// Persistence for alert groups, spike alerts, consecutive & priority alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Most recent active group for the instrument whose last alert is within `window_minutes`.
    async fn active_alert_group(
        &self,
        instrument: &str,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertGroup>, AlertError>;

    async fn create_alert_group(&self, alert: &SpikeAlert) -> Result<GroupId, AlertError>;

    async fn update_alert_group(&self, group_id: GroupId, alert: &SpikeAlert)
    -> Result<(), AlertError>;

    async fn append_alert(&self, group_id: GroupId, alert: &SpikeAlert) -> Result<(), AlertError>;

    async fn save_consecutive_alert(&self, alert: &ConsecutiveAlert) -> Result<(), AlertError>;

    async fn save_priority_alert(&self, alert: &PriorityAlert) -> Result<(), AlertError>;
}

#[async_trait]
impl<T> BaselineProvider for Arc<T>
where
    T: BaselineProvider + ?Sized,
{
    async fn historical_bullish_volumes(
        &self,
        instrument: &str,
        lookback_hours: u32,
        offset_minutes: u32,
        now: DateTime<Utc>,
        exclude_from: DateTime<Utc>,
    ) -> Result<Vec<Decimal>, AlertError> {
        (**self)
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

#[async_trait]
impl<T> AlertStore for Arc<T>
where
    T: AlertStore + ?Sized,
{
    async fn active_alert_group(
        &self,
        instrument: &str,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertGroup>, AlertError> {
        (**self)
            .active_alert_group(instrument, window_minutes, now)
            .await
    }

    async fn create_alert_group(&self, alert: &SpikeAlert) -> Result<GroupId, AlertError> {
        (**self).create_alert_group(alert).await
    }

    async fn update_alert_group(
        &self,
        group_id: GroupId,
        alert: &SpikeAlert,
    ) -> Result<(), AlertError> {
        (**self).update_alert_group(group_id, alert).await
    }

    async fn append_alert(&self, group_id: GroupId, alert: &SpikeAlert) -> Result<(), AlertError> {
        (**self).append_alert(group_id, alert).await
    }

    async fn save_consecutive_alert(&self, alert: &ConsecutiveAlert) -> Result<(), AlertError> {
        (**self).save_consecutive_alert(alert).await
    }

    async fn save_priority_alert(&self, alert: &PriorityAlert) -> Result<(), AlertError> {
        (**self).save_priority_alert(alert).await
    }
}
