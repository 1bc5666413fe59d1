use std::time::Duration;

use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::errors::{classify, ErrorSeverity};

/// One record read from the input topic. The payload is `None` when the
/// record had no value or the value was not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("fatal kafka consumer error: {0}")]
    Fatal(KafkaError),
    #[error("kafka consumer error: {0}")]
    Transient(KafkaError),
}

impl ConsumeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsumeError::Fatal(_))
    }
}

/// Consumer subscribed to a single topic that hands out batches of records.
///
/// Offset storing is manual: the caller stores a record's offset once it is
/// done with it, and librdkafka auto-commits whatever has been stored. This
/// gives at-least-once delivery without committing on every record.
pub struct RecordConsumer {
    consumer: StreamConsumer,
    topic: String,
    batch_size: usize,
    poll_timeout: Duration,
}

impl RecordConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            );

        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = consumer_config.kafka_consumer_topic,
            group_id = consumer_config.kafka_consumer_group,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: consumer_config.kafka_consumer_topic.clone(),
            batch_size: consumer_config.batch_size(),
            poll_timeout: consumer_config.poll_timeout(),
        })
    }

    /// Collect up to `batch_size` records, waiting at most `poll_timeout`.
    /// An empty batch is a normal result on a quiet topic.
    pub async fn poll_batch(&self) -> Result<Vec<ConsumedRecord>, ConsumeError> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut records = Vec::with_capacity(self.batch_size);
        let mut error_count = 0_u64;

        while records.len() < self.batch_size {
            let received = match timeout_at(deadline, self.consumer.recv()).await {
                Ok(received) => received,
                // Timeout - return what we have
                Err(_) => break,
            };

            match received {
                Ok(message) => {
                    let payload = match message.payload_view::<str>() {
                        Some(Ok(payload)) => Some(payload.to_owned()),
                        Some(Err(e)) => {
                            warn!(
                                partition = message.partition(),
                                offset = message.offset(),
                                "Record payload is not valid UTF-8: {}",
                                e
                            );
                            None
                        }
                        None => None,
                    };
                    records.push(ConsumedRecord {
                        topic: message.topic().to_owned(),
                        partition: message.partition(),
                        offset: message.offset(),
                        payload,
                    });
                }
                Err(e) => match classify(&e) {
                    ErrorSeverity::Fatal => return Err(ConsumeError::Fatal(e)),
                    ErrorSeverity::Benign => continue,
                    ErrorSeverity::Transient => {
                        error_count += 1;
                        warn!("Kafka consumer error: {}", e);
                        if !records.is_empty() {
                            break;
                        }
                        sleep(Duration::from_millis(100 * error_count.min(10))).await;
                        if Instant::now() >= deadline {
                            return Err(ConsumeError::Transient(e));
                        }
                    }
                },
            }
        }

        Ok(records)
    }

    /// Mark a record as done, its offset is committed on the next auto-commit.
    pub fn store_offset(&self, record: &ConsumedRecord) -> Result<(), KafkaError> {
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset)
    }

    /// Commit whatever was stored so far and leave the consumer group.
    pub fn close(&self) {
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            // Nothing stored yet is reported as an error too
            debug!("Final offset commit skipped: {}", e);
        }
        self.consumer.unsubscribe();
        info!(topic = self.topic, "Kafka consumer closed");
    }
}
