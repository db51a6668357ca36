use super::engine::AnalysisEngine;
use crate::{
    alert::AlertEvent,
    candle::Candle,
    notify::Notifier,
    store::{AlertStore, BaselineProvider},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Candle update together with every alert its analysis fired.
pub type AnalysedCandle = (Candle, Vec<AlertEvent>);

/// Routes candle updates to one worker task per instrument.
///
/// Each worker drains its own queue in arrival order, so updates for one instrument are analysed
/// sequentially while workers for different instruments run concurrently.
#[derive(Debug)]
pub struct InstrumentDispatcher<B, S, N> {
    engine: Arc<AnalysisEngine<B, S, N>>,
    workers: FnvHashMap<SmolStr, mpsc::UnboundedSender<(Candle, DateTime<Utc>)>>,
    output: mpsc::UnboundedSender<AnalysedCandle>,
}

impl<B, S, N> InstrumentDispatcher<B, S, N>
where
    B: BaselineProvider + 'static,
    S: AlertStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        engine: Arc<AnalysisEngine<B, S, N>>,
        output: mpsc::UnboundedSender<AnalysedCandle>,
    ) -> Self {
        Self {
            engine,
            workers: FnvHashMap::default(),
            output,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Queue a candle received at `now` on its instrument worker, spawning the worker if needed.
    pub fn dispatch(&mut self, candle: Candle, now: DateTime<Utc>) {
        let message = match self.workers.get(&candle.instrument) {
            Some(tx) => match tx.send((candle, now)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => {
                    warn!(instrument = %message.0.instrument, "instrument worker stopped, respawning");
                    message
                }
            },
            None => (candle, now),
        };

        let instrument = message.0.instrument.clone();
        let tx = self.spawn_worker(instrument.clone());
        if tx.send(message).is_ok() {
            self.workers.insert(instrument, tx);
        }
    }

    /// Dispatch every candle from `input` until it closes, stamping each with the receipt time.
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<Candle>) {
        while let Some(candle) = input.recv().await {
            self.dispatch(candle, Utc::now());
        }
        info!(workers = self.workers(), "candle input closed, stopping dispatcher");
    }

    fn spawn_worker(&self, instrument: SmolStr) -> mpsc::UnboundedSender<(Candle, DateTime<Utc>)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Candle, DateTime<Utc>)>();
        let engine = Arc::clone(&self.engine);
        let output = self.output.clone();

        debug!(%instrument, "spawning instrument worker");
        tokio::spawn(async move {
            while let Some((candle, now)) = rx.recv().await {
                let events = engine.analyse(&candle, now).await;
                if output.send((candle, events)).is_err() {
                    debug!(%instrument, "analysis output closed, stopping instrument worker");
                    break;
                }
            }
        });

        tx
    }
}
