pub mod config;
pub mod errors;
pub mod kafka_consumer;
pub mod kafka_producer;
