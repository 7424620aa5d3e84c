//! Redpanda/Kafka reservation queue.
//!
//! Producer side keys messages by voucher id so reservations for one voucher
//! land on one partition and stay ordered. Consumer side shares a consumer
//! group across payment workers for load balancing; delivery is
//! at-least-once, which the worker tolerates through its terminal-order
//! reprocess guard.

use super::{QueueError, ReservationQueue, ReservationSource};
use crate::types::ReservationMessage;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Producing side backed by a Kafka-compatible broker.
pub struct RedpandaQueue {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaQueue {
    /// Creates a producer for the given brokers and topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Connect`] if the producer cannot be created.
    pub fn new(brokers: &str, topic: &str) -> Result<Self, QueueError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
            timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl ReservationQueue for RedpandaQueue {
    async fn enqueue(&self, message: &ReservationMessage) -> Result<(), QueueError> {
        let payload = message.encode();
        let key = message.voucher_id.to_string();
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(err, _)| QueueError::Enqueue(err.to_string()))?;
        tracing::info!(
            order_id = %message.order_id,
            user_id = %message.user_id,
            voucher_id = %message.voucher_id,
            topic = %self.topic,
            "reservation enqueued"
        );
        Ok(())
    }
}

/// Consuming side backed by a Kafka-compatible broker.
pub struct RedpandaSource {
    consumer: StreamConsumer,
}

impl RedpandaSource {
    /// Creates a consumer in `group` subscribed to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Connect`] if the consumer cannot be created or
    /// the subscription fails.
    pub fn new(brokers: &str, group: &str, topic: &str) -> Result<Self, QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl ReservationSource for RedpandaSource {
    async fn recv(&mut self) -> Option<ReservationMessage> {
        loop {
            match self.consumer.recv().await {
                Ok(borrowed) => {
                    let Some(payload) = borrowed.payload() else {
                        tracing::warn!("skipping reservation message without payload");
                        continue;
                    };
                    let Ok(text) = std::str::from_utf8(payload) else {
                        tracing::warn!("skipping non-utf8 reservation message");
                        continue;
                    };
                    match ReservationMessage::decode(text) {
                        Ok(message) => return Some(message),
                        Err(err) => {
                            tracing::warn!(error = %err, "skipping malformed reservation message");
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "reservation queue receive error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
