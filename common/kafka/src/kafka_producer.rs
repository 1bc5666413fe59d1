use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::errors::{classify, ErrorSeverity};

pub struct KafkaContext {}

impl rdkafka::ClientContext for KafkaContext {}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(KafkaContext {})?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
}

impl KafkaProduceError {
    pub fn is_fatal(&self) -> bool {
        match self {
            KafkaProduceError::KafkaProduceError { error } => {
                classify(error) == ErrorSeverity::Fatal
            }
        }
    }
}

/// Producer bound to the stage's output topic. Payloads are sent as-is,
/// without key or headers.
pub struct RecordProducer {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    queue_timeout: Duration,
}

impl RecordProducer {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: &str, queue_timeout: Duration) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
            queue_timeout,
        }
    }

    /// Send one payload and wait for the delivery report.
    pub async fn publish(&self, payload: &str) -> Result<(), KafkaProduceError> {
        let record = FutureRecord::<(), str>::to(&self.topic).payload(payload);

        match self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok(_) => Ok(()),
            Err((error, _)) => Err(KafkaProduceError::KafkaProduceError { error }),
        }
    }

    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            error!(topic = self.topic, "Failed to flush producer: {}", e);
        } else {
            info!(topic = self.topic, "Kafka producer flushed");
        }
    }
}
