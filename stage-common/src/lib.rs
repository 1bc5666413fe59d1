//! Shared building blocks of the rule-driven stream stages.
//!
//! Every stage runs the same loop: a [`rules::RuleStore`] keeps an atomically
//! swapped snapshot of the stage's rules fresh in the background, while a
//! [`orchestrator::StageOrchestrator`] polls the bus, hands each record to the
//! stage's [`engine::RuleEngine`] and forwards the ones that pass.

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics_consts;
pub mod orchestrator;
pub mod rules;
pub mod server;
pub mod service;
pub mod test_utils;

pub use engine::RuleEngine;
pub use error::{BusError, ConfigError, FetchError, LookupError, ProcessError};
pub use message::{json_text, Message, Outcome};
pub use rules::{Rule, RuleSnapshot, RuleSource, RuleStore};
