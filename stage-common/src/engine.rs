use async_trait::async_trait;

use crate::error::ProcessError;
use crate::message::Message;
use crate::rules::Rule;

/// Stage-specific decision logic.
///
/// `process` receives one message and the rule snapshot current when the
/// record was picked up, and returns the message with its outcome set. It may
/// await external lookups but never blocks a thread.
#[async_trait]
pub trait RuleEngine: Send + Sync + 'static {
    type Rule: Rule;

    /// Stage name, used for logs and metric labels.
    fn name(&self) -> &'static str;

    async fn process(&self, message: Message, rules: &[Self::Rule]) -> Result<Message, ProcessError>;

    /// Release external connections. Called once while the stage drains.
    async fn shutdown(&self) {}
}
