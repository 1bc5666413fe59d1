use async_trait::async_trait;
use serde_json::Value;
use stage_common::{json_text, Message, Outcome, ProcessError, RuleEngine};
use tracing::debug;

use crate::rules::FilterRule;

/// Passes a message only when every rule's predicate holds.
#[derive(Debug, Default)]
pub struct FilterEngine;

impl FilterEngine {
    pub fn new() -> Self {
        Self
    }

    fn matches(payload: &Value, rules: &[FilterRule]) -> Result<bool, ProcessError> {
        for rule in rules {
            let Some(field) = payload.get(&rule.field_name) else {
                debug!(rule_id = rule.rule_id, field = rule.field_name, "Field missing");
                return Ok(false);
            };
            if !rule.function()?.evaluate(&json_text(field), &rule.filter_value) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl RuleEngine for FilterEngine {
    type Rule = FilterRule;

    fn name(&self) -> &'static str {
        "filter"
    }

    async fn process(&self, message: Message, rules: &[FilterRule]) -> Result<Message, ProcessError> {
        if rules.is_empty() {
            return Err(ProcessError::InvalidRules);
        }
        let Some(value) = message.payload() else {
            return Ok(message.with_outcome(Outcome::Drop));
        };

        let payload: Value = serde_json::from_str(value)?;
        let outcome = if Self::matches(&payload, rules)? {
            Outcome::Pass
        } else {
            Outcome::Drop
        };
        Ok(message.with_outcome(outcome))
    }
}
