//! Pull-based subscriber with a bounded worker pool.
//!
//! One pull loop fetches batches from a durable consumer and feeds a bounded
//! queue; a fixed number of workers drain it. Backpressure comes from the
//! queue: the pull loop stops fetching while all workers are busy and the
//! queue is full.
//!
//! Each delivery is settled exactly once by this subscriber:
//! - handler succeeded, or no handler matches the subject: ack
//! - envelope could not be decoded, or the handler failed: nak
//!
//! After `max_deliver` attempts the transport stops redelivering (there is no
//! dead-letter sink).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::envelope::EventEnvelope;
use crate::shutdown::{Shutdown, ShutdownTrigger};
use crate::subject;
use crate::transport::{ConsumerConfig, Delivery, Transport, TransportError};

/// Handler failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The message can never be processed (undecodable, unknown shape).
    #[error("poison message: {0}")]
    Poison(String),

    /// Processing may succeed on redelivery.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Reacts to envelopes. Must be idempotent: delivery is at-least-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub consumer: ConsumerConfig,
    pub batch_size: usize,
    pub fetch_wait: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Pause after a failed fetch.
    pub error_backoff: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            consumer: ConsumerConfig::new("ddmrp-engine-service"),
            batch_size: 100,
            fetch_wait: Duration::from_secs(5),
            workers: 4,
            queue_capacity: 100,
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl SubscriberConfig {
    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_fetch_wait(mut self, fetch_wait: Duration) -> Self {
        self.fetch_wait = fetch_wait;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Subscription statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriberMetrics {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub redelivered: u64,
    pub last_received_at: Option<DateTime<Utc>>,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Nacked,
}

pub struct Subscriber {
    transport: Arc<dyn Transport>,
    config: SubscriberConfig,
    handlers: Vec<(String, Arc<dyn EventHandler>)>,
    metrics: Arc<Mutex<SubscriberMetrics>>,
}

impl Subscriber {
    pub fn new(transport: Arc<dyn Transport>, config: SubscriberConfig) -> Self {
        Self {
            transport,
            config,
            handlers: Vec::new(),
            metrics: Arc::new(Mutex::new(SubscriberMetrics::default())),
        }
    }

    /// Register a handler for an exact subject or a wildcard pattern.
    ///
    /// Registering the same pattern twice replaces the earlier handler.
    pub fn register_handler(&mut self, pattern: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let pattern = pattern.into();
        self.handlers.retain(|(p, _)| *p != pattern);
        self.handlers.push((pattern, handler));
    }

    pub fn metrics(&self) -> SubscriberMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut SubscriberMetrics)) {
        if let Ok(mut m) = self.metrics.lock() {
            f(&mut m);
        }
    }

    fn handler_for(&self, subject: &str) -> Option<Arc<dyn EventHandler>> {
        let pattern = subject::best_match(self.handlers.iter().map(|(p, _)| p.as_str()), subject)?;
        self.handlers
            .iter()
            .find(|(p, _)| p == pattern)
            .map(|(_, h)| h.clone())
    }

    /// Decode, dispatch, and settle a single delivery.
    pub async fn process(&self, delivery: &Delivery) -> Disposition {
        self.record(|m| {
            m.received += 1;
            m.last_received_at = Some(Utc::now());
            if delivery.is_redelivery() {
                m.redelivered += 1;
            }
        });

        let decoded = EventEnvelope::from_json(&delivery.data)
            .map_err(|e| HandlerError::Poison(e.to_string()))
            .and_then(|env| {
                env.validate()
                    .map_err(|e| HandlerError::Poison(e.to_string()))
                    .map(|()| env)
            });

        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(err) => return self.fail(delivery, err).await,
        };

        let Some(handler) = self.handler_for(envelope.subject()) else {
            debug!(subject = %envelope.subject(), event_id = %envelope.id(), "no handler registered, acking");
            return self.settle(delivery, Disposition::Acked).await;
        };

        match handler.handle(&envelope).await {
            Ok(()) => {
                self.record(|m| m.processed += 1);
                self.settle(delivery, Disposition::Acked).await
            }
            Err(err) => self.fail(delivery, err).await,
        }
    }

    async fn fail(&self, delivery: &Delivery, err: HandlerError) -> Disposition {
        self.record(|m| m.failed += 1);
        if delivery.delivery_count >= self.config.consumer.max_deliver {
            warn!(
                subject = %delivery.subject,
                delivery_id = %delivery.id,
                attempts = delivery.delivery_count,
                error = %err,
                "delivery failed for the last time, it will not be redelivered"
            );
        } else {
            warn!(
                subject = %delivery.subject,
                delivery_id = %delivery.id,
                attempt = delivery.delivery_count,
                error = %err,
                "delivery failed"
            );
        }
        self.settle(delivery, Disposition::Nacked).await
    }

    async fn settle(&self, delivery: &Delivery, disposition: Disposition) -> Disposition {
        let consumer = &self.config.consumer;
        let result = match disposition {
            Disposition::Acked => self.transport.ack(consumer, delivery).await,
            Disposition::Nacked => self.transport.nak(consumer, delivery).await,
        };
        if let Err(e) = result {
            error!(delivery_id = %delivery.id, error = %e, ?disposition, "failed to settle delivery");
        }
        disposition
    }

    /// Run the pull loop and workers until `shutdown` fires or the transport closes.
    ///
    /// Returns after every fetched delivery has been settled.
    pub async fn run(self, shutdown: Shutdown) {
        let subscriber = Arc::new(self);
        let config = subscriber.config.clone();
        let (tx, rx) = mpsc::channel::<Delivery>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers: Vec<JoinHandle<()>> = (0..config.workers.max(1))
            .map(|worker| {
                let subscriber = subscriber.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(delivery) = next else { break };
                        subscriber.process(&delivery).await;
                    }
                    debug!(worker, "subscriber worker stopped");
                })
            })
            .collect();

        info!(consumer = %config.consumer.name, workers = workers.len(), "subscriber started");

        'pull: loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break 'pull,
                fetched = subscriber.transport.fetch(&config.consumer, config.batch_size, config.fetch_wait) => fetched,
            };

            match fetched {
                Ok(batch) => {
                    for delivery in batch {
                        if tx.send(delivery).await.is_err() {
                            break 'pull;
                        }
                    }
                }
                Err(TransportError::Closed) => break 'pull,
                Err(e) => {
                    error!(consumer = %config.consumer.name, error = %e, "fetch failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'pull,
                        _ = tokio::time::sleep(config.error_backoff) => {}
                    }
                }
            }
        }

        drop(tx);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "subscriber worker panicked");
            }
        }
        info!(consumer = %config.consumer.name, "subscriber stopped");
    }

    /// Run on a background task.
    pub fn spawn(self) -> SubscriberHandle {
        let (trigger, shutdown) = Shutdown::channel();
        let metrics = self.metrics.clone();
        let join = tokio::spawn(self.run(shutdown));
        SubscriberHandle {
            trigger,
            join,
            metrics,
        }
    }
}

/// Handle to control a running subscriber.
#[derive(Debug)]
pub struct SubscriberHandle {
    trigger: ShutdownTrigger,
    join: JoinHandle<()>,
    metrics: Arc<Mutex<SubscriberMetrics>>,
}

impl SubscriberHandle {
    pub fn metrics(&self) -> SubscriberMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Stop fetching, drain queued deliveries, and wait for the workers.
    pub async fn shutdown(self) {
        self.trigger.trigger();
        if let Err(e) = self.join.await {
            error!(error = %e, "subscriber task failed");
        }
    }
}
