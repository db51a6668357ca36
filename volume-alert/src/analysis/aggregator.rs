use crate::{
    alert::{AggregatedAlert, AlertStage, PriorityAlert, SpikeAlert},
    error::AlertError,
    notify::{AlertPayload, Notifier},
    store::AlertStore,
};
use tracing::{debug, info};

/// Groups spike alerts per instrument into sliding time windows, persisting them through the
/// [`AlertStore`] and notifying only the first provisional alert of each new group.
#[derive(Debug, Clone)]
pub struct AlertAggregator<S, N> {
    store: S,
    notifier: N,
}

impl<S, N> AlertAggregator<S, N>
where
    S: AlertStore,
    N: Notifier,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Fold `alert` into the active group for its instrument (or a new one).
    ///
    /// `consecutive_count` is `Some` when the instrument is in an active consecutive bullish run,
    /// in which case the alert is additionally persisted as a [`PriorityAlert`].
    pub async fn ingest(
        &self,
        alert: SpikeAlert,
        consecutive_count: Option<u32>,
        grouping_window_minutes: u32,
    ) -> Result<AggregatedAlert, AlertError> {
        let active = self
            .store
            .active_alert_group(&alert.instrument, grouping_window_minutes, alert.time)
            .await?;

        let (group_id, group_count, is_grouped) = match active {
            Some(group) => {
                self.store.update_alert_group(group.id, &alert).await?;
                (group.id, group.alert_count + 1, true)
            }
            None => (self.store.create_alert_group(&alert).await?, 1, false),
        };
        self.store.append_alert(group_id, &alert).await?;

        if let Some(count) = consecutive_count {
            self.store
                .save_priority_alert(&PriorityAlert::new(alert.clone(), count))
                .await?;
        }

        let mut aggregated = AggregatedAlert {
            alert,
            group_id,
            group_count,
            is_grouped,
            is_priority: consecutive_count.is_some(),
            consecutive_count,
            notified: false,
        };

        if !is_grouped && aggregated.alert.stage == AlertStage::Provisional {
            aggregated.notified = self
                .notifier
                .notify(&AlertPayload::Spike(aggregated.clone()))
                .await;
        } else {
            debug!(
                instrument = %aggregated.alert.instrument,
                %group_id,
                group_count,
                stage = %aggregated.alert.stage,
                "spike alert persisted without notification"
            );
        }

        info!(
            instrument = %aggregated.alert.instrument,
            %group_id,
            group_count,
            stage = %aggregated.alert.stage,
            verdict = %aggregated.alert.verdict,
            ratio = %aggregated.alert.volume_ratio,
            is_priority = aggregated.is_priority,
            "volume spike alert"
        );

        Ok(aggregated)
    }
}
