use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "test_topic_out")]
    pub kafka_producer_topic: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

impl KafkaConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_message_timeout_ms as u64)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    // We default to "earliest" for this, but if you're bringing up a new stage, you probably want "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets are stored by the stage once a record has a decision, and the
    // stored offsets are committed by librdkafka on this interval.
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: i32,

    // Upper bound on how long one poll waits to fill a batch
    #[envconfig(default = "1000")]
    pub kafka_consumer_poll_timeout_ms: u64,

    #[envconfig(default = "500")]
    pub kafka_consumer_batch_size: usize,
}

impl ConsumerConfig {
    /// Group and topic differ per stage, so each stage fills in its own
    /// defaults here before loading its config from the environment.
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_consumer_poll_timeout_ms)
    }

    /// A batch size of zero would never yield a record, treat it as one.
    pub fn batch_size(&self) -> usize {
        self.kafka_consumer_batch_size.max(1)
    }
}
