//! In-memory stand-ins for the rule database and the message bus, used by the
//! unit tests here and the end-to-end tests of each stage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::bus::{BusSink, BusSource, ConsumedRecord};
use crate::error::{BusError, FetchError};
use crate::rules::{Rule, RuleSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRule {
    pub id: i64,
}

impl TestRule {
    pub fn new(id: i64) -> Self {
        Self { id }
    }
}

impl Rule for TestRule {
    fn rule_id(&self) -> i64 {
        self.id
    }
}

/// Rule source that replays a fixed list of responses, one per fetch, and
/// returns an empty rule set once they run out.
pub struct ScriptedRuleSource<R> {
    responses: Mutex<VecDeque<Result<Vec<R>, FetchError>>>,
    delay_after: Option<(usize, Duration)>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl<R> ScriptedRuleSource<R> {
    pub fn new(responses: Vec<Result<Vec<R>, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            delay_after: None,
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Every fetch after the first `calls` ones sleeps for `delay` first.
    pub fn with_delay_after(mut self, calls: usize, delay: Duration) -> Self {
        self.delay_after = Some((calls, delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Rule> RuleSource<R> for ScriptedRuleSource<R> {
    async fn fetch_rules(&self) -> Result<Vec<R>, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((after, delay)) = self.delay_after {
            if call >= after {
                tokio::time::sleep(delay).await;
            }
        }

        let next = self
            .responses
            .lock()
            .expect("poisoned lock")
            .pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Build a batch of records with consecutive offsets on partition 0.
pub fn records(first_offset: i64, payloads: &[Option<&str>]) -> Vec<ConsumedRecord> {
    payloads
        .iter()
        .zip(first_offset..)
        .map(|(payload, offset)| ConsumedRecord {
            topic: "test_topic_in".to_string(),
            partition: 0,
            offset,
            payload: payload.map(str::to_string),
        })
        .collect()
}

/// Shared view over an in-memory bus, kept by the test to inspect what the
/// stage published and acknowledged.
#[derive(Clone, Default)]
pub struct MemoryBus {
    published: Arc<Mutex<Vec<String>>>,
    acked: Arc<Mutex<Vec<i64>>>,
    source_closed: Arc<AtomicBool>,
    sink_closed: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that hands out `polls` in order. Once they are exhausted it
    /// flips `shutdown`, if given, and then only returns empty batches.
    pub fn source(
        &self,
        polls: Vec<Result<Vec<ConsumedRecord>, BusError>>,
        shutdown: Option<watch::Sender<bool>>,
    ) -> MemoryBusSource {
        self.delayed_source(
            polls.into_iter().map(|poll| (Duration::ZERO, poll)).collect(),
            shutdown,
        )
    }

    /// Like [`MemoryBus::source`], each poll first waits for its delay.
    pub fn delayed_source(
        &self,
        polls: Vec<(Duration, Result<Vec<ConsumedRecord>, BusError>)>,
        shutdown: Option<watch::Sender<bool>>,
    ) -> MemoryBusSource {
        MemoryBusSource {
            polls: polls.into(),
            shutdown,
            acked: self.acked.clone(),
            closed: self.source_closed.clone(),
        }
    }

    pub fn sink(&self) -> MemoryBusSink {
        self.failing_sink(Vec::new())
    }

    /// A sink whose first publishes fail with `failures`, in order.
    pub fn failing_sink(&self, failures: Vec<BusError>) -> MemoryBusSink {
        MemoryBusSink {
            failures: Mutex::new(failures.into()),
            published: self.published.clone(),
            closed: self.sink_closed.clone(),
        }
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().expect("poisoned lock").clone()
    }

    pub fn acked(&self) -> Vec<i64> {
        self.acked.lock().expect("poisoned lock").clone()
    }

    pub fn is_source_closed(&self) -> bool {
        self.source_closed.load(Ordering::SeqCst)
    }

    pub fn is_sink_closed(&self) -> bool {
        self.sink_closed.load(Ordering::SeqCst)
    }
}

pub struct MemoryBusSource {
    polls: VecDeque<(Duration, Result<Vec<ConsumedRecord>, BusError>)>,
    shutdown: Option<watch::Sender<bool>>,
    acked: Arc<Mutex<Vec<i64>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BusSource for MemoryBusSource {
    async fn poll(&mut self) -> Result<Vec<ConsumedRecord>, BusError> {
        if let Some((delay, next)) = self.polls.pop_front() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return next;
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Vec::new())
    }

    fn ack(&mut self, record: &ConsumedRecord) -> Result<(), BusError> {
        self.acked
            .lock()
            .expect("poisoned lock")
            .push(record.offset);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MemoryBusSink {
    failures: Mutex<VecDeque<BusError>>,
    published: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BusSink for MemoryBusSink {
    async fn publish(&self, payload: &str) -> Result<(), BusError> {
        let failure = self.failures.lock().expect("poisoned lock").pop_front();
        if let Some(e) = failure {
            return Err(e);
        }
        self.published
            .lock()
            .expect("poisoned lock")
            .push(payload.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
