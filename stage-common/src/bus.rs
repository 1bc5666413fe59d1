use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_consumer::RecordConsumer;
use common_kafka::kafka_producer::RecordProducer;
use tracing::warn;

pub use common_kafka::kafka_consumer::ConsumedRecord;

use crate::error::BusError;

/// Inbound side of the message bus.
#[async_trait]
pub trait BusSource: Send {
    /// Wait for the next batch of records. An empty batch means the poll
    /// timed out on a quiet topic.
    async fn poll(&mut self) -> Result<Vec<ConsumedRecord>, BusError>;

    /// Acknowledge a record once its outcome has been acted upon.
    fn ack(&mut self, record: &ConsumedRecord) -> Result<(), BusError>;

    async fn close(&mut self);
}

/// Outbound side of the message bus.
#[async_trait]
pub trait BusSink: Send + Sync {
    async fn publish(&self, payload: &str) -> Result<(), BusError>;

    async fn close(&self);
}

pub struct KafkaBusSource {
    consumer: RecordConsumer,
}

impl KafkaBusSource {
    pub fn new(consumer: RecordConsumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl BusSource for KafkaBusSource {
    async fn poll(&mut self) -> Result<Vec<ConsumedRecord>, BusError> {
        Ok(self.consumer.poll_batch().await?)
    }

    fn ack(&mut self, record: &ConsumedRecord) -> Result<(), BusError> {
        self.consumer.store_offset(record).map_err(|e| {
            warn!(
                partition = record.partition,
                offset = record.offset,
                "Failed to store offset: {}",
                e
            );
            BusError::Unavailable(e.to_string())
        })
    }

    async fn close(&mut self) {
        self.consumer.close();
    }
}

pub struct KafkaBusSink {
    producer: RecordProducer,
    flush_timeout: Duration,
}

impl KafkaBusSink {
    pub fn new(producer: RecordProducer, flush_timeout: Duration) -> Self {
        Self {
            producer,
            flush_timeout,
        }
    }
}

#[async_trait]
impl BusSink for KafkaBusSink {
    async fn publish(&self, payload: &str) -> Result<(), BusError> {
        Ok(self.producer.publish(payload).await?)
    }

    async fn close(&self) {
        self.producer.flush(self.flush_timeout);
    }
}
