use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::metrics_consts::{RULES_ACTIVE, RULES_GENERATION, RULES_REFRESH, RULES_REFRESH_TIME};

pub mod postgres;

/// A single configured rule row. Rules are immutable once loaded.
pub trait Rule: Clone + fmt::Debug + Send + Sync + 'static {
    fn rule_id(&self) -> i64;
}

/// Immutable, ordered set of rules as of one successful refresh.
///
/// Generation 0 is the empty set a store starts out with, every successful
/// non-empty refresh bumps it by one.
#[derive(Debug)]
pub struct RuleSnapshot<R> {
    rules: Vec<R>,
    generation: u64,
}

impl<R> RuleSnapshot<R> {
    pub fn new(rules: Vec<R>, generation: u64) -> Self {
        Self { rules, generation }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn rules(&self) -> &[R] {
        &self.rules
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<R> Deref for RuleSnapshot<R> {
    type Target = [R];

    fn deref(&self) -> &[R] {
        &self.rules
    }
}

/// Where a stage's rules come from.
#[async_trait]
pub trait RuleSource<R>: Send + Sync {
    /// Fetch the complete, ordered rule set.
    async fn fetch_rules(&self) -> Result<Vec<R>, FetchError>;

    /// Release connections held by the source.
    async fn close(&self) {}
}

/// Read side of a rule store, cheap to clone and hand out to other tasks.
pub struct RulesHandle<R> {
    receiver: watch::Receiver<Arc<RuleSnapshot<R>>>,
}

impl<R> Clone for RulesHandle<R> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<R> RulesHandle<R> {
    /// Latest complete snapshot. Never blocks on a refresh in progress.
    pub fn current(&self) -> Arc<RuleSnapshot<R>> {
        self.receiver.borrow().clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleStoreSettings {
    pub refresh_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for RuleStoreSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Replaced { generation: u64, rules: usize },
    /// The source returned no rules, the previous snapshot stays.
    KeptEmpty,
}

/// Keeps a stage's rules fresh from a [`RuleSource`].
///
/// Readers always see a complete snapshot: the refresh task builds the new
/// rule set off to the side and swaps it in with a single `send_replace`.
/// Failed or empty fetches never replace the current snapshot.
pub struct RuleStore<R: Rule> {
    stage: String,
    source: Arc<dyn RuleSource<R>>,
    snapshot: Arc<watch::Sender<Arc<RuleSnapshot<R>>>>,
    settings: RuleStoreSettings,
    cancel_token: CancellationToken,
    refresh_task: Option<JoinHandle<()>>,
}

impl<R: Rule> RuleStore<R> {
    pub fn new(stage: &str, source: Arc<dyn RuleSource<R>>, settings: RuleStoreSettings) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(RuleSnapshot::empty()));
        Self {
            stage: stage.to_owned(),
            source,
            snapshot: Arc::new(snapshot),
            settings,
            cancel_token: CancellationToken::new(),
            refresh_task: None,
        }
    }

    /// Current snapshot, lock-free for readers.
    pub fn current_rules(&self) -> Arc<RuleSnapshot<R>> {
        self.snapshot.borrow().clone()
    }

    pub fn handle(&self) -> RulesHandle<R> {
        RulesHandle {
            receiver: self.snapshot.subscribe(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.refresh_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Fetch once and publish the result if it is a usable rule set.
    pub async fn refresh(&self) -> Result<RefreshOutcome, FetchError> {
        refresh_snapshot(&self.stage, self.source.as_ref(), &self.snapshot).await
    }

    /// Load the rules once, then keep refreshing them in the background until
    /// [`RuleStore::stop`] is called. A failing first load is logged and the
    /// stage starts with whatever snapshot it has.
    pub async fn start(&mut self) {
        if self.refresh_task.is_some() {
            warn!(stage = self.stage, "Rule store already started");
            return;
        }

        if let Err(e) = self.refresh().await {
            warn!(
                stage = self.stage,
                "Initial rule load failed, starting with an empty rule set: {}", e
            );
        }

        let stage = self.stage.clone();
        let source = self.source.clone();
        let snapshot = self.snapshot.clone();
        let cancel = self.cancel_token.child_token();
        let refresh_interval = self.settings.refresh_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately, the initial load already ran
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(stage, "Rule refresh loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        // An in-flight refresh runs to completion, stop() bounds the wait
                        if let Err(e) = refresh_snapshot(&stage, source.as_ref(), &snapshot).await {
                            warn!(stage, "Rule refresh failed, keeping previous rules: {}", e);
                        }
                    }
                }
            }
        });

        self.refresh_task = Some(task);
        info!(
            stage = self.stage,
            interval_secs = refresh_interval.as_secs(),
            "Rule store started"
        );
    }

    /// Stop the refresh task, waiting at most the configured shutdown timeout
    /// before aborting it, then release the source.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();

        if let Some(mut task) = self.refresh_task.take() {
            match timeout(self.settings.shutdown_timeout, &mut task).await {
                Ok(_) => debug!(stage = self.stage, "Rule refresh task stopped"),
                Err(_) => {
                    warn!(
                        stage = self.stage,
                        "Rule refresh task did not stop within {:?}, aborting",
                        self.settings.shutdown_timeout
                    );
                    task.abort();
                }
            }
        }

        self.source.close().await;
        info!(stage = self.stage, "Rule store stopped");
    }
}

impl<R: Rule> Drop for RuleStore<R> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

async fn refresh_snapshot<R: Rule>(
    stage: &str,
    source: &dyn RuleSource<R>,
    snapshot: &watch::Sender<Arc<RuleSnapshot<R>>>,
) -> Result<RefreshOutcome, FetchError> {
    let started = Instant::now();
    let fetched = source.fetch_rules().await;
    metrics::histogram!(RULES_REFRESH_TIME, &[("stage", stage.to_owned())])
        .record(started.elapsed().as_secs_f64());

    let rules = match fetched {
        Ok(rules) => rules,
        Err(e) => {
            metrics::counter!(
                RULES_REFRESH,
                &[("stage", stage.to_owned()), ("result", "error".to_owned())]
            )
            .increment(1);
            return Err(e);
        }
    };

    if rules.is_empty() {
        warn!(stage, "Rule source returned no rules, keeping previous rules");
        metrics::counter!(
            RULES_REFRESH,
            &[("stage", stage.to_owned()), ("result", "empty".to_owned())]
        )
        .increment(1);
        return Ok(RefreshOutcome::KeptEmpty);
    }

    let count = rules.len();
    let rule_ids: Vec<i64> = rules.iter().map(Rule::rule_id).collect();
    let generation = snapshot.borrow().generation() + 1;
    snapshot.send_replace(Arc::new(RuleSnapshot::new(rules, generation)));

    info!(stage, generation, count, ?rule_ids, "Updated rules");
    metrics::counter!(
        RULES_REFRESH,
        &[("stage", stage.to_owned()), ("result", "replaced".to_owned())]
    )
    .increment(1);
    metrics::gauge!(RULES_ACTIVE, &[("stage", stage.to_owned())]).set(count as f64);
    metrics::gauge!(RULES_GENERATION, &[("stage", stage.to_owned())]).set(generation as f64);

    Ok(RefreshOutcome::Replaced {
        generation,
        rules: count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedRuleSource, TestRule};

    fn settings(refresh_ms: u64) -> RuleStoreSettings {
        RuleStoreSettings {
            refresh_interval: Duration::from_millis(refresh_ms),
            shutdown_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_starts_with_empty_snapshot() {
        let source = Arc::new(ScriptedRuleSource::<TestRule>::new(vec![]));
        let store = RuleStore::new("test", source, settings(1000));

        let snapshot = store.current_rules();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.generation(), 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let source = Arc::new(ScriptedRuleSource::new(vec![Ok(vec![
            TestRule::new(1),
            TestRule::new(2),
        ])]));
        let store = RuleStore::new("test", source, settings(1000));

        let outcome = store.refresh().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Replaced {
                generation: 1,
                rules: 2
            }
        );

        let snapshot = store.current_rules();
        assert_eq!(snapshot.generation(), 1);
        let ids: Vec<i64> = snapshot.iter().map(|r| r.rule_id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_and_empty_fetches_keep_previous_rules() {
        let source = Arc::new(ScriptedRuleSource::new(vec![
            Ok(vec![TestRule::new(7)]),
            Err(FetchError::Unavailable("connection refused".to_string())),
            Ok(vec![]),
        ]));
        let store = RuleStore::new("test", source, settings(1000));

        store.refresh().await.unwrap();
        assert!(store.refresh().await.is_err());
        assert_eq!(store.refresh().await.unwrap(), RefreshOutcome::KeptEmpty);

        let snapshot = store.current_rules();
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].rule_id(), 7);
    }

    #[tokio::test]
    async fn test_start_survives_failing_initial_load() {
        let source = Arc::new(ScriptedRuleSource::<TestRule>::new(vec![Err(
            FetchError::Unavailable("down".to_string()),
        )]));
        let mut store = RuleStore::new("test", source.clone(), settings(1000));

        store.start().await;
        assert!(store.is_running());
        assert!(store.current_rules().is_empty());

        store.stop().await;
        assert!(!store.is_running());
        assert!(source.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_publishes_new_rules() {
        let source = Arc::new(ScriptedRuleSource::new(vec![
            Ok(vec![TestRule::new(1)]),
            Ok(vec![TestRule::new(1), TestRule::new(2)]),
        ]));
        let mut store = RuleStore::new("test", source.clone(), settings(50));
        let handle = store.handle();

        store.start().await;
        assert_eq!(handle.current().len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let snapshot = handle.current();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.generation() >= 2);
        assert!(source.calls() >= 2);

        store.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_slow_refresh() {
        let source = Arc::new(
            ScriptedRuleSource::new(vec![Ok(vec![TestRule::new(1)])])
                .with_delay_after(1, Duration::from_secs(60)),
        );
        let mut store = RuleStore::new("test", source.clone(), settings(10));

        store.start().await;
        // Let the second fetch begin and hang
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        store.stop().await;
        assert!(started.elapsed() <= Duration::from_millis(250));
        assert!(!store.is_running());
        assert!(source.is_closed());
        assert_eq!(store.current_rules().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_always_see_complete_snapshots() {
        let batches: Vec<_> = (1..=50)
            .map(|generation| Ok((0..generation).map(TestRule::new).collect()))
            .collect();
        let source = Arc::new(ScriptedRuleSource::new(batches));
        let mut store = RuleStore::new("test", source, settings(1));
        store.start().await;

        let mut readers = Vec::new();
        for _ in 0..1000 {
            let handle = store.handle();
            readers.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let snapshot = handle.current();
                    // Generation N always carries rules 0..N in order
                    assert_eq!(snapshot.len() as u64, snapshot.generation());
                    for (index, rule) in snapshot.iter().enumerate() {
                        assert_eq!(rule.rule_id(), index as i64);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for reader in readers {
            reader.await.unwrap();
        }
        store.stop().await;
    }
}
