use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stage_common::orchestrator::StageOrchestrator;
use stage_common::rules::RuleStoreSettings;
use stage_common::test_utils::{records, MemoryBus, ScriptedRuleSource};
use stage_common::{LookupError, RuleStore};
use stage_dedup::engine::DedupEngine;
use stage_dedup::rules::DedupRule;
use stage_dedup::store::{DedupStore, DedupVerdict, MemoryDedupStore};
use tokio::sync::watch;

fn rule_store(rules: Vec<DedupRule>) -> RuleStore<DedupRule> {
    RuleStore::new(
        "dedup",
        Arc::new(ScriptedRuleSource::new(vec![Ok(rules)])),
        RuleStoreSettings::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_repeat_within_ttl_is_dropped_and_passes_after_expiry() {
    let bus = MemoryBus::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = StageOrchestrator::new(
        rule_store(vec![DedupRule::new(1, "userId", 60, true)]),
        Arc::new(DedupEngine::new(Arc::new(MemoryDedupStore::new()))),
        Box::new(bus.delayed_source(
            vec![
                (Duration::ZERO, Ok(records(0, &[Some(r#"{"userId":"u1"}"#)]))),
                (
                    Duration::from_secs(30),
                    Ok(records(1, &[Some(r#"{"userId":"u1"}"#)])),
                ),
                (
                    Duration::from_secs(31),
                    Ok(records(2, &[Some(r#"{"userId":"u1"}"#)])),
                ),
            ],
            Some(shutdown_tx),
        )),
        Box::new(bus.sink()),
    );

    let summary = orchestrator.run(shutdown_rx).await.unwrap();

    assert_eq!(summary.received, 3);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.dropped, 1);
    assert_eq!(bus.published().len(), 2);
    assert_eq!(bus.acked(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_without_rules_every_message_passes() {
    let bus = MemoryBus::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = StageOrchestrator::new(
        rule_store(vec![]),
        Arc::new(DedupEngine::new(Arc::new(MemoryDedupStore::new()))),
        Box::new(bus.source(
            vec![Ok(records(
                0,
                &[Some(r#"{"userId":"u1"}"#), Some(r#"{"userId":"u1"}"#)],
            ))],
            Some(shutdown_tx),
        )),
        Box::new(bus.sink()),
    );

    let summary = orchestrator.run(shutdown_rx).await.unwrap();

    assert_eq!(summary.passed, 2);
    assert_eq!(bus.published().len(), 2);
}

struct UnavailableStore;

#[async_trait]
impl DedupStore for UnavailableStore {
    async fn check_and_mark(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<DedupVerdict, LookupError> {
        Err(LookupError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_lookup_failure_drops_the_message() {
    let bus = MemoryBus::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = StageOrchestrator::new(
        rule_store(vec![DedupRule::new(1, "userId", 60, true)]),
        Arc::new(DedupEngine::new(Arc::new(UnavailableStore))),
        Box::new(bus.source(
            vec![Ok(records(
                0,
                &[Some(r#"{"userId":"u1"}"#), Some(r#"{"other":"x"}"#)],
            ))],
            Some(shutdown_tx),
        )),
        Box::new(bus.sink()),
    );

    let summary = orchestrator.run(shutdown_rx).await.unwrap();

    // The second message has no key field and never reaches the store
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.dropped, 1);
    assert_eq!(bus.published(), vec![r#"{"other":"x"}"#.to_string()]);
    assert_eq!(bus.acked(), vec![0, 1]);
}
