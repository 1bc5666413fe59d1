use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stage_common::{json_text, Message, Outcome, ProcessError, RuleEngine};
use tracing::debug;

use crate::rules::DedupRule;
use crate::store::{DedupStore, DedupVerdict};

pub const KEY_SEPARATOR: char = ':';

/// Longest dedup window, about a century. Larger rule TTLs are clamped to it
/// so every store can represent the expiry.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Dedup key and window for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub key: String,
    pub ttl: Duration,
}

/// Build the key from the active rules whose field is present in `payload`,
/// in rule order. The window is the longest TTL among those rules, capped at
/// [`MAX_TTL_SECS`].
pub fn build_key(payload: &Value, rules: &[DedupRule]) -> DedupKey {
    let mut key = String::new();
    let mut ttl_secs = 0_u64;

    for rule in rules.iter().filter(|rule| rule.is_active) {
        let Some(field) = payload.get(&rule.field_name) else {
            continue;
        };
        key.push_str(&json_text(field));
        key.push(KEY_SEPARATOR);
        ttl_secs = ttl_secs.max(u64::try_from(rule.time_to_live_sec).unwrap_or(0));
    }

    DedupKey {
        key,
        ttl: Duration::from_secs(ttl_secs.min(MAX_TTL_SECS)),
    }
}

pub struct DedupEngine {
    store: Arc<dyn DedupStore>,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RuleEngine for DedupEngine {
    type Rule = DedupRule;

    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn process(&self, message: Message, rules: &[DedupRule]) -> Result<Message, ProcessError> {
        if rules.is_empty() {
            return Ok(message.with_outcome(Outcome::Pass));
        }
        let Some(value) = message.payload() else {
            return Ok(message.with_outcome(Outcome::Drop));
        };

        let payload: Value = serde_json::from_str(value)?;
        let DedupKey { key, ttl } = build_key(&payload, rules);
        if key.is_empty() {
            debug!("No dedup field present, passing message");
            return Ok(message.with_outcome(Outcome::Pass));
        }

        let outcome = match self.store.check_and_mark(&key, value, ttl).await? {
            DedupVerdict::Unique => Outcome::Pass,
            DedupVerdict::Duplicate => {
                debug!(key, "Duplicate message");
                Outcome::Drop
            }
        };
        Ok(message.with_outcome(outcome))
    }

    async fn shutdown(&self) {
        self.store.close().await;
    }
}
