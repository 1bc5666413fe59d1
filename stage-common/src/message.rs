use serde_json::Value;

/// Decision taken for one inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Forward the message to the output topic.
    Pass,
    /// Suppress the message.
    Drop,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Drop => "drop",
        }
    }
}

/// One inbound record on its way through a rule engine.
///
/// A message starts out as `Pass`, the engine decides once and the
/// orchestrator reads the decision once. Messages are never reused across
/// records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    value: Option<String>,
    outcome: Outcome,
}

impl Message {
    pub fn new(value: impl Into<String>) -> Self {
        Self::from_payload(Some(value.into()))
    }

    pub fn from_payload(value: Option<String>) -> Self {
        Self {
            value,
            outcome: Outcome::Pass,
        }
    }

    /// The JSON payload, `None` when the record carried no value.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The payload when there is something to work with, `None` when it is
    /// absent or empty.
    pub fn payload(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_value(mut self, value: String) -> Self {
        self.value = Some(value);
        self
    }
}

/// Text form of a top-level JSON field as rules compare and key on it:
/// strings verbatim, scalars in their JSON form, containers as "".
pub fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}
