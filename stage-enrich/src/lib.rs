pub mod config;
pub mod engine;
pub mod lookup;
pub mod rules;
