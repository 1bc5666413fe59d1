use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use stage_common::{json_text, Message, ProcessError, RuleEngine};
use tracing::{debug, warn};

use crate::lookup::DocumentLookup;
use crate::rules::EnrichRule;

/// What to do with a rule whose lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorPolicy {
    /// Leave the message as it was before the rule.
    Skip,
    /// Apply the rule's default value.
    Default,
}

impl FromStr for LookupErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(LookupErrorPolicy::Skip),
            "default" => Ok(LookupErrorPolicy::Default),
            _ => Err(format!("unknown lookup error policy: {s}")),
        }
    }
}

/// Enriches messages with documents from a [`DocumentLookup`]. Never drops.
pub struct EnrichEngine {
    lookup: Arc<dyn DocumentLookup>,
    on_lookup_error: LookupErrorPolicy,
}

impl EnrichEngine {
    pub fn new(lookup: Arc<dyn DocumentLookup>, on_lookup_error: LookupErrorPolicy) -> Self {
        Self {
            lookup,
            on_lookup_error,
        }
    }

    async fn apply(&self, payload: &mut Map<String, Value>, rule: &EnrichRule) {
        let default = || Value::String(rule.field_value_default.clone());

        let enriched = match self
            .lookup
            .find_latest(&rule.field_name_enrichment, &rule.field_value)
            .await
        {
            Ok(Some(document)) => {
                let matches = document
                    .get(&rule.field_name_enrichment)
                    .is_some_and(|v| json_text(v) == rule.field_value);
                if matches {
                    document
                } else {
                    default()
                }
            }
            Ok(None) => {
                debug!(rule_id = rule.rule_id, "No document found, using default");
                default()
            }
            Err(e) => {
                warn!(
                    rule_id = rule.rule_id,
                    policy = ?self.on_lookup_error,
                    "Document lookup failed: {}",
                    e
                );
                match self.on_lookup_error {
                    LookupErrorPolicy::Skip => return,
                    LookupErrorPolicy::Default => default(),
                }
            }
        };

        payload.insert(rule.field_name.clone(), enriched);
    }
}

#[async_trait]
impl RuleEngine for EnrichEngine {
    type Rule = EnrichRule;

    fn name(&self) -> &'static str {
        "enrich"
    }

    async fn process(&self, message: Message, rules: &[EnrichRule]) -> Result<Message, ProcessError> {
        if rules.is_empty() {
            return Ok(message);
        }
        let Some(value) = message.payload() else {
            return Ok(message);
        };

        let mut payload = match serde_json::from_str::<Value>(value) {
            Ok(Value::Object(payload)) => payload,
            Ok(_) => {
                debug!("Payload is not a JSON object, passing through");
                return Ok(message);
            }
            Err(e) => {
                warn!("Malformed payload, passing through unchanged: {}", e);
                return Ok(message);
            }
        };

        for rule in rules {
            self.apply(&mut payload, rule).await;
        }

        let enriched = serde_json::to_string(&payload)?;
        Ok(message.with_value(enriched))
    }

    async fn shutdown(&self) {
        self.lookup.close().await;
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use stage_common::{LookupError, Outcome};

    use super::*;
    use crate::lookup::MemoryDocumentLookup;

    fn rule(rule_id: i64, field_name: &str, enrichment_field: &str, value: &str, default: &str) -> EnrichRule {
        EnrichRule {
            rule_id,
            field_name: field_name.to_string(),
            field_name_enrichment: enrichment_field.to_string(),
            field_value: value.to_string(),
            field_value_default: default.to_string(),
        }
    }

    fn parsed(message: &Message) -> Value {
        serde_json::from_str(message.value().unwrap()).unwrap()
    }

    struct FailingLookup;

    #[async_trait]
    impl DocumentLookup for FailingLookup {
        async fn find_latest(&self, _field: &str, _value: &str) -> Result<Option<Value>, LookupError> {
            Err(LookupError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_hit_sets_document_and_miss_sets_default() {
        let lookup = Arc::new(MemoryDocumentLookup::new());
        lookup.insert(json!({"sku": "A1", "price": 10}));
        let engine = EnrichEngine::new(lookup, LookupErrorPolicy::Skip);

        let rules = vec![
            rule(1, "product", "sku", "A1", "unknown"),
            rule(2, "other", "sku", "Z9", "none"),
        ];
        let result = engine
            .process(Message::new(r#"{"id":1}"#), &rules)
            .await
            .unwrap();

        assert_eq!(result.outcome(), Outcome::Pass);
        assert_json_eq!(
            parsed(&result),
            json!({"id": 1, "product": {"sku": "A1", "price": 10}, "other": "none"})
        );
    }

    #[tokio::test]
    async fn test_later_rules_overwrite_earlier_ones() {
        let lookup = Arc::new(MemoryDocumentLookup::new());
        lookup.insert(json!({"sku": "A1", "price": 10}));
        let engine = EnrichEngine::new(lookup, LookupErrorPolicy::Skip);

        let rules = vec![
            rule(1, "product", "sku", "A1", "unknown"),
            rule(2, "product", "sku", "B2", "replaced"),
        ];
        let result = engine
            .process(Message::new(r#"{"id":1}"#), &rules)
            .await
            .unwrap();

        assert_json_eq!(parsed(&result), json!({"id": 1, "product": "replaced"}));
    }

    #[tokio::test]
    async fn test_key_order_is_preserved() {
        let engine = EnrichEngine::new(Arc::new(MemoryDocumentLookup::new()), LookupErrorPolicy::Skip);
        let rules = vec![rule(1, "added", "sku", "A1", "d")];

        let result = engine
            .process(Message::new(r#"{"z":1,"a":2,"m":3}"#), &rules)
            .await
            .unwrap();

        assert_eq!(result.value(), Some(r#"{"z":1,"a":2,"m":3,"added":"d"}"#));
    }

    #[tokio::test]
    async fn test_lookup_failure_policies() {
        let rules = vec![rule(1, "product", "sku", "A1", "unknown")];

        let skip = EnrichEngine::new(Arc::new(FailingLookup), LookupErrorPolicy::Skip);
        let result = skip
            .process(Message::new(r#"{"id":1}"#), &rules)
            .await
            .unwrap();
        assert_json_eq!(parsed(&result), json!({"id": 1}));

        let default = EnrichEngine::new(Arc::new(FailingLookup), LookupErrorPolicy::Default);
        let result = default
            .process(Message::new(r#"{"id":1}"#), &rules)
            .await
            .unwrap();
        assert_json_eq!(parsed(&result), json!({"id": 1, "product": "unknown"}));
    }

    #[tokio::test]
    async fn test_unparseable_payloads_pass_through() {
        let engine = EnrichEngine::new(Arc::new(MemoryDocumentLookup::new()), LookupErrorPolicy::Skip);
        let rules = vec![rule(1, "product", "sku", "A1", "unknown")];

        for payload in ["{broken", "[1,2]", "\"text\""] {
            let result = engine.process(Message::new(payload), &rules).await.unwrap();
            assert_eq!(result.value(), Some(payload));
            assert_eq!(result.outcome(), Outcome::Pass);
        }
    }

    #[tokio::test]
    async fn test_empty_rules_leave_message_unchanged() {
        let engine = EnrichEngine::new(Arc::new(MemoryDocumentLookup::new()), LookupErrorPolicy::Skip);
        let result = engine.process(Message::new(r#"{"b":1, "a":2}"#), &[]).await.unwrap();
        assert_eq!(result.value(), Some(r#"{"b":1, "a":2}"#));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("SKIP".parse::<LookupErrorPolicy>(), Ok(LookupErrorPolicy::Skip));
        assert_eq!("default".parse::<LookupErrorPolicy>(), Ok(LookupErrorPolicy::Default));
        assert!("drop".parse::<LookupErrorPolicy>().is_err());
    }
}
