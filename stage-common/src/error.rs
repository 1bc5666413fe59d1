use std::time::Duration;

use common_kafka::kafka_consumer::ConsumeError;
use common_kafka::kafka_producer::KafkaProduceError;
use thiserror::Error;

/// Errors raised while loading a stage's rules. They never reach the poll
/// loop: the rule store logs them and keeps serving the previous snapshot.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode rules: {0}")]
    Decode(String),
    #[error("timed out fetching rules after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for FetchError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => FetchError::Decode(err.to_string()),
            _ => FetchError::Unavailable(err.to_string()),
        }
    }
}

/// Errors raised by a stage's external lookup store.
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("lookup store unavailable: {0}")]
    Unavailable(String),
    #[error("lookup store timed out")]
    Timeout,
    #[error("invalid response from lookup store: {0}")]
    Decode(String),
}

/// A rule that cannot be applied as configured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rule {rule_id} uses unsupported filter function '{name}'")]
    UnsupportedFilterFunction { rule_id: i64, name: String },
}

/// Why a rule engine could not decide on a record. The orchestrator turns all
/// of these into a drop for the record.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("no rules configured for this stage")]
    InvalidRules,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("malformed message payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl ProcessError {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::InvalidRules => "invalid_rules",
            ProcessError::Config(_) => "config",
            ProcessError::Parse(_) => "parse",
            ProcessError::Lookup(_) => "lookup",
        }
    }
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error(transparent)]
    Consume(#[from] ConsumeError),
    #[error(transparent)]
    Produce(#[from] KafkaProduceError),
    #[error("bus disconnected: {0}")]
    Disconnected(String),
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

impl BusError {
    /// Fatal errors end the poll loop and drain the stage.
    pub fn is_fatal(&self) -> bool {
        match self {
            BusError::Consume(e) => e.is_fatal(),
            BusError::Produce(e) => e.is_fatal(),
            BusError::Disconnected(_) => true,
            BusError::Unavailable(_) => false,
        }
    }
}
