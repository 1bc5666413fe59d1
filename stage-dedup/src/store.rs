use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use stage_common::LookupError;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// First sighting within the window, the key has been recorded.
    Unique,
    /// The key was already recorded, nothing was written.
    Duplicate,
}

/// Key/value store with expiry used to remember recently seen keys.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically record `key` unless it is already present. A `ttl` of zero
    /// stores the key without expiry.
    async fn check_and_mark(&self, key: &str, value: &str, ttl: Duration) -> Result<DedupVerdict, LookupError>;

    async fn close(&self) {}
}

fn lookup_error(err: RedisError) -> LookupError {
    if err.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Unavailable(err.to_string())
    }
}

pub struct RedisDedupStore {
    connection: MultiplexedConnection,
}

impl RedisDedupStore {
    pub async fn new(addr: &str, response_timeout: Option<Duration>) -> Result<Self, RedisError> {
        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout.filter(|t| !t.is_zero()) {
            config = config.set_response_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        info!("Connected to redis");

        Ok(Self { connection })
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn check_and_mark(&self, key: &str, value: &str, ttl: Duration) -> Result<DedupVerdict, LookupError> {
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if !ttl.is_zero() {
            cmd.arg("EX").arg(ttl.as_secs());
        }

        let result: Option<String> = cmd.query_async(&mut conn).await.map_err(lookup_error)?;

        match result {
            Some(_) => Ok(DedupVerdict::Unique), // Key was set
            None => Ok(DedupVerdict::Duplicate), // Key already existed
        }
    }
}

/// Inserts between two sweeps of expired keys in [`MemoryDedupStore`].
pub const SWEEP_INTERVAL: usize = 1000;

#[derive(Default)]
struct MemoryEntries {
    keys: HashMap<String, (String, Option<Instant>)>,
    inserts_since_sweep: usize,
}

impl MemoryEntries {
    fn sweep(&mut self, now: Instant) {
        let before = self.keys.len();
        self.keys
            .retain(|_, (_, expires_at)| !expires_at.is_some_and(|deadline| deadline <= now));
        self.inserts_since_sweep = 0;
        debug!(evicted = before - self.keys.len(), "Swept expired dedup keys");
    }
}

/// In-process store for local runs and tests. An expired key is replaced when
/// it is seen again, and every [`SWEEP_INTERVAL`] inserts all expired keys are
/// evicted.
#[derive(Default)]
pub struct MemoryDedupStore {
    entries: Mutex<MemoryEntries>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.keys.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn check_and_mark(&self, key: &str, value: &str, ttl: Duration) -> Result<DedupVerdict, LookupError> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LookupError::Unavailable("dedup store lock poisoned".to_string()))?;

        if let Some((_, expires_at)) = entries.keys.get(key) {
            match expires_at {
                Some(deadline) if *deadline <= now => {}
                _ => return Ok(DedupVerdict::Duplicate),
            }
        }

        if entries.inserts_since_sweep >= SWEEP_INTERVAL {
            entries.sweep(now);
        }

        // A deadline past what the clock can represent never expires
        let expires_at = if ttl.is_zero() { None } else { now.checked_add(ttl) };
        entries
            .keys
            .insert(key.to_string(), (value.to_string(), expires_at));
        entries.inserts_since_sweep += 1;
        Ok(DedupVerdict::Unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expires_keys() {
        let store = MemoryDedupStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(
            store.check_and_mark("u1:", "{}", ttl).await.unwrap(),
            DedupVerdict::Unique
        );
        assert_eq!(
            store.check_and_mark("u1:", "{}", ttl).await.unwrap(),
            DedupVerdict::Duplicate
        );

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(
            store.check_and_mark("u1:", "{}", ttl).await.unwrap(),
            DedupVerdict::Unique
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_zero_ttl_never_expires() {
        let store = MemoryDedupStore::new();

        store
            .check_and_mark("k:", "{}", Duration::ZERO)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;

        assert_eq!(
            store
                .check_and_mark("k:", "{}", Duration::ZERO)
                .await
                .unwrap(),
            DedupVerdict::Duplicate
        );
    }

    #[tokio::test]
    async fn test_memory_store_keys_are_independent() {
        let store = MemoryDedupStore::new();
        let ttl = Duration::from_secs(60);

        store.check_and_mark("a:", "{}", ttl).await.unwrap();
        assert_eq!(
            store.check_and_mark("b:", "{}", ttl).await.unwrap(),
            DedupVerdict::Unique
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_sweeps_expired_keys() {
        let store = MemoryDedupStore::new();
        let ttl = Duration::from_secs(1);

        for i in 0..SWEEP_INTERVAL {
            store
                .check_and_mark(&format!("k{i}:"), "{}", ttl)
                .await
                .unwrap();
        }
        assert_eq!(store.len(), SWEEP_INTERVAL);

        tokio::time::advance(Duration::from_secs(3600)).await;
        store.check_and_mark("fresh:", "{}", ttl).await.unwrap();

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_sweep_keeps_live_keys() {
        let store = MemoryDedupStore::new();

        store
            .check_and_mark("forever:", "{}", Duration::ZERO)
            .await
            .unwrap();
        store
            .check_and_mark("long:", "{}", Duration::from_secs(7200))
            .await
            .unwrap();
        for i in 2..SWEEP_INTERVAL {
            store
                .check_and_mark(&format!("k{i}:"), "{}", Duration::from_secs(1))
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        store.check_and_mark("fresh:", "{}", Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(
            store
                .check_and_mark("long:", "{}", Duration::from_secs(7200))
                .await
                .unwrap(),
            DedupVerdict::Duplicate
        );
    }

    #[tokio::test]
    async fn test_memory_store_huge_ttl_does_not_overflow() {
        let store = MemoryDedupStore::new();
        let ttl = Duration::from_secs(u64::MAX);

        assert_eq!(
            store.check_and_mark("k:", "{}", ttl).await.unwrap(),
            DedupVerdict::Unique
        );
        assert_eq!(
            store.check_and_mark("k:", "{}", ttl).await.unwrap(),
            DedupVerdict::Duplicate
        );
    }
}
