use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bus::{BusSink, BusSource, ConsumedRecord};
use crate::engine::RuleEngine;
use crate::error::BusError;
use crate::message::{Message, Outcome};
use crate::metrics_consts::{
    BUS_POLL_ERRORS, PUBLISH_FAILURES, RECORDS_RECEIVED, RECORD_OUTCOMES,
    RECORD_PROCESSING_ERRORS, RECORD_PROCESSING_TIME, STAGE_STATE,
};
use crate::rules::RuleStore;

/// Lifecycle of a stage: Starting -> Running -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Starting => "starting",
            StageState::Running => "running",
            StageState::Draining => "draining",
            StageState::Stopped => "stopped",
        }
    }

    fn as_gauge(&self) -> f64 {
        match self {
            StageState::Starting => 0.0,
            StageState::Running => 1.0,
            StageState::Draining => 2.0,
            StageState::Stopped => 3.0,
        }
    }
}

/// Counters for one run of a stage, returned once it has drained.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub received: u64,
    pub passed: u64,
    pub dropped: u64,
    pub errors: u64,
    pub publish_failures: u64,
}

/// Drives one stage: poll a batch, run every record through the engine with
/// the current rules, publish what passes, acknowledge, repeat.
///
/// Records of a batch are handled strictly in order and a record is only
/// acknowledged after its outcome has been acted upon, so a crash or a fatal
/// bus error leaves the unhandled tail for redelivery.
pub struct StageOrchestrator<E: RuleEngine> {
    name: &'static str,
    rules: RuleStore<E::Rule>,
    engine: Arc<E>,
    source: Box<dyn BusSource>,
    sink: Box<dyn BusSink>,
    state: watch::Sender<StageState>,
}

impl<E: RuleEngine> StageOrchestrator<E> {
    pub fn new(
        rules: RuleStore<E::Rule>,
        engine: Arc<E>,
        source: Box<dyn BusSource>,
        sink: Box<dyn BusSink>,
    ) -> Self {
        let (state, _) = watch::channel(StageState::Starting);
        Self {
            name: engine.name(),
            rules,
            engine,
            source,
            sink,
            state,
        }
    }

    /// Subscribe to lifecycle changes, used by the readiness probe.
    pub fn status(&self) -> watch::Receiver<StageState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` flips to true (or its sender goes away) or the bus
    /// fails fatally. Either way the stage drains before this returns.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<StageSummary, BusError> {
        self.rules.start().await;
        self.transition(StageState::Running);

        let mut summary = StageSummary::default();
        let mut fatal = None;

        'poll: loop {
            let stop = *shutdown.borrow();
            if stop {
                info!(stage = self.name, "Shutdown requested, stopping poll loop");
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!(stage = self.name, "Shutdown channel closed, stopping poll loop");
                        break 'poll;
                    }
                    continue 'poll;
                }
                polled = self.source.poll() => polled,
            };

            let records = match polled {
                Ok(records) => records,
                Err(e) if e.is_fatal() => {
                    error!(stage = self.name, "Fatal error polling bus: {}", e);
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(stage = self.name, "Error polling bus: {}", e);
                    metrics::counter!(BUS_POLL_ERRORS, &[("stage", self.name)]).increment(1);
                    continue;
                }
            };

            if records.is_empty() {
                continue;
            }
            debug!(stage = self.name, count = records.len(), "Processing batch");

            let total = records.len();
            for (index, record) in records.iter().enumerate() {
                if let Err(e) = self.handle_record(record, &mut summary).await {
                    error!(
                        stage = self.name,
                        partition = record.partition,
                        offset = record.offset,
                        "Fatal bus error, stopping: {}",
                        e
                    );
                    fatal = Some(e);
                    break 'poll;
                }

                let stop = *shutdown.borrow();
                if stop && index + 1 < total {
                    info!(
                        stage = self.name,
                        unprocessed = total - index - 1,
                        "Shutdown requested mid-batch, leaving the rest for redelivery"
                    );
                    break 'poll;
                }
            }
        }

        self.drain().await;
        info!(stage = self.name, ?summary, "Stage stopped");

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn handle_record(
        &mut self,
        record: &ConsumedRecord,
        summary: &mut StageSummary,
    ) -> Result<(), BusError> {
        let started = Instant::now();
        summary.received += 1;
        metrics::counter!(RECORDS_RECEIVED, &[("stage", self.name)]).increment(1);

        let rules = self.rules.current_rules();
        let message = Message::from_payload(record.payload.clone());

        let message = match self.engine.process(message, &rules).await {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    stage = self.name,
                    partition = record.partition,
                    offset = record.offset,
                    rules_generation = rules.generation(),
                    kind = e.kind(),
                    "Failed to process record, dropping it: {}",
                    e
                );
                summary.errors += 1;
                metrics::counter!(
                    RECORD_PROCESSING_ERRORS,
                    &[("stage", self.name), ("kind", e.kind())]
                )
                .increment(1);
                Message::from_payload(None).with_outcome(Outcome::Drop)
            }
        };

        let outcome = match (message.outcome(), message.value()) {
            (Outcome::Pass, Some(payload)) if !payload.is_empty() => {
                match self.sink.publish(payload).await {
                    Ok(()) => summary.passed += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!(
                            stage = self.name,
                            partition = record.partition,
                            offset = record.offset,
                            "Failed to publish record: {}",
                            e
                        );
                        summary.publish_failures += 1;
                        metrics::counter!(PUBLISH_FAILURES, &[("stage", self.name)]).increment(1);
                    }
                }
                Outcome::Pass
            }
            (Outcome::Pass, _) => {
                debug!(
                    stage = self.name,
                    offset = record.offset,
                    "Passed record has no payload to publish"
                );
                summary.dropped += 1;
                Outcome::Drop
            }
            (Outcome::Drop, _) => {
                summary.dropped += 1;
                Outcome::Drop
            }
        };

        metrics::counter!(
            RECORD_OUTCOMES,
            &[("stage", self.name), ("outcome", outcome.as_str())]
        )
        .increment(1);
        metrics::histogram!(RECORD_PROCESSING_TIME, &[("stage", self.name)])
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = self.source.ack(record) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(
                stage = self.name,
                offset = record.offset,
                "Failed to acknowledge record: {}",
                e
            );
        }

        Ok(())
    }

    async fn drain(&mut self) {
        self.transition(StageState::Draining);
        self.rules.stop().await;
        self.source.close().await;
        self.sink.close().await;
        self.engine.shutdown().await;
        self.transition(StageState::Stopped);
    }

    fn transition(&self, next: StageState) {
        let previous = self.state.send_replace(next);
        info!(
            stage = self.name,
            from = previous.as_str(),
            to = next.as_str(),
            "Stage state changed"
        );
        metrics::gauge!(STAGE_STATE, &[("stage", self.name)]).set(next.as_gauge());
    }
}
