//! Durable transport abstraction (mechanics only).
//!
//! A transport is an append-only, subject-addressed log read through named
//! durable consumers. A fetched delivery stays pending for that consumer until
//! it is acked; a nak or an expired ack wait makes it eligible for redelivery,
//! up to `max_deliver` attempts in total.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backing log could not be reached. Usually transient.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The transport was shut down.
    #[error("transport closed")]
    Closed,

    /// Stored data could not be encoded or decoded.
    #[error("transport codec error: {0}")]
    Codec(String),
}

/// Durable consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable consumer name; progress is tracked per name.
    pub name: String,
    /// Subject patterns this consumer receives. Empty means everything.
    pub filter_subjects: Vec<String>,
    /// Total delivery attempts before a message is given up on.
    pub max_deliver: u32,
    /// How long a fetched delivery may stay unacknowledged before redelivery.
    pub ack_wait: Duration,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter_subjects: Vec::new(),
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
        }
    }

    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter_subjects.push(pattern.into());
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver.max(1);
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn accepts(&self, subject: &str) -> bool {
        self.filter_subjects.is_empty()
            || self
                .filter_subjects
                .iter()
                .any(|p| crate::subject::matches(p, subject))
    }
}

/// One delivery of a stored message to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-specific handle used to ack/nak this delivery.
    pub id: String,
    pub subject: String,
    pub data: Vec<u8>,
    /// 1 on first delivery.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Durably append `data` under `subject`.
    async fn append(&self, subject: &str, data: Vec<u8>) -> Result<(), TransportError>;

    /// Fetch up to `batch` deliveries, waiting at most `wait` for the first one.
    ///
    /// Returns an empty batch on timeout.
    async fn fetch(
        &self,
        consumer: &ConsumerConfig,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, TransportError>;

    async fn ack(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError>;

    /// Negative acknowledgement: redeliver as soon as possible.
    async fn nak(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn append(&self, subject: &str, data: Vec<u8>) -> Result<(), TransportError> {
        (**self).append(subject, data).await
    }

    async fn fetch(
        &self,
        consumer: &ConsumerConfig,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, TransportError> {
        (**self).fetch(consumer, batch, wait).await
    }

    async fn ack(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError> {
        (**self).ack(consumer, delivery).await
    }

    async fn nak(&self, consumer: &ConsumerConfig, delivery: &Delivery) -> Result<(), TransportError> {
        (**self).nak(consumer, delivery).await
    }
}
