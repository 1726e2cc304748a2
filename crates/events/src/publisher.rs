//! Envelope publisher with bounded retry.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use ddmrp_core::OrganizationId;

use crate::envelope::{EventEnvelope, Payload};
use crate::event::Event;
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::transport::{Transport, TransportError};

/// Source identifier stamped on envelopes by default.
pub const DEFAULT_SOURCE: &str = "ddmrp-engine-service";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: TransportError },

    #[error("publish cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub retry: RetryPolicy,
    /// Value of the envelope `source` field.
    pub source: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Publishing statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublisherMetrics {
    pub published: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub last_published_at: Option<DateTime<Utc>>,
}

/// Wraps events in envelopes and appends them to a [`Transport`].
///
/// Cloning is cheap; clones share the transport and the metrics.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    config: PublisherConfig,
    metrics: Arc<Mutex<PublisherMetrics>>,
    shutdown: Shutdown,
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, config: PublisherConfig) -> Self {
        Self {
            transport,
            config,
            metrics: Arc::new(Mutex::new(PublisherMetrics::default())),
            shutdown: Shutdown::never(),
        }
    }

    /// Abort backoff waits when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn source(&self) -> &str {
        &self.config.source
    }

    pub fn metrics(&self) -> PublisherMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut PublisherMetrics)) {
        if let Ok(mut m) = self.metrics.lock() {
            f(&mut m);
        }
    }

    /// Build an envelope for `payload` and publish it.
    pub async fn publish(
        &self,
        subject: &str,
        event_type: &str,
        organization_id: OrganizationId,
        payload: Payload,
    ) -> Result<EventEnvelope, PublishError> {
        let envelope = EventEnvelope::new(
            subject,
            event_type,
            self.config.source.clone(),
            organization_id,
            payload,
        );
        self.publish_envelope(&envelope).await?;
        Ok(envelope)
    }

    /// Publish a typed event; subject, type, and schema version come from the event.
    pub async fn publish_event<E>(
        &self,
        organization_id: OrganizationId,
        event: &E,
    ) -> Result<EventEnvelope, PublishError>
    where
        E: Event + Serialize,
    {
        let envelope = self.envelope_for(organization_id, event)?;
        self.publish_envelope(&envelope).await?;
        Ok(envelope)
    }

    /// Publish a typed event that continues `parent`'s causal chain.
    pub async fn publish_caused_by<E>(
        &self,
        parent: &EventEnvelope,
        event: &E,
    ) -> Result<EventEnvelope, PublishError>
    where
        E: Event + Serialize,
    {
        let envelope = self
            .envelope_for(parent.organization_id(), event)?
            .caused_by(parent);
        self.publish_envelope(&envelope).await?;
        Ok(envelope)
    }

    pub fn envelope_for<E>(
        &self,
        organization_id: OrganizationId,
        event: &E,
    ) -> Result<EventEnvelope, PublishError>
    where
        E: Event + Serialize,
    {
        let payload = Payload::encode(event)?;
        Ok(EventEnvelope::new(
            event.subject(),
            event.event_type(),
            self.config.source.clone(),
            organization_id,
            payload,
        )
        .with_schema_version(event.schema_version())
        .with_timestamp(event.occurred_at()))
    }

    #[instrument(
        skip(self, envelope),
        fields(
            subject = %envelope.subject(),
            event_id = %envelope.id(),
            organization_id = %envelope.organization_id()
        ),
        err
    )]
    pub async fn publish_envelope(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        self.record(|m| m.published += 1);

        let data = match envelope.to_json() {
            Ok(data) => data,
            Err(e) => {
                self.record(|m| m.failed += 1);
                return Err(PublishError::Encode(e));
            }
        };

        match self.append_with_retry(envelope.subject(), data).await {
            Ok(()) => {
                self.record(|m| {
                    m.succeeded += 1;
                    m.last_published_at = Some(Utc::now());
                });
                debug!("event published");
                Ok(())
            }
            Err(e) => {
                self.record(|m| m.failed += 1);
                Err(e)
            }
        }
    }

    async fn append_with_retry(&self, subject: &str, data: Vec<u8>) -> Result<(), PublishError> {
        let policy = self.config.retry;
        let mut retry = 0u32;

        loop {
            if self.shutdown.is_triggered() {
                return Err(PublishError::Cancelled);
            }

            let last = match self.transport.append(subject, data.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !policy.should_retry(retry) {
                return Err(PublishError::Exhausted {
                    attempts: retry + 1,
                    last,
                });
            }

            retry += 1;
            self.record(|m| m.retries += 1);
            let delay = policy.delay_for_retry(retry);
            warn!(attempt = retry, delay_ms = delay.as_millis() as u64, error = %last, "publish failed, retrying");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Err(PublishError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize)]
    struct Ping {
        at: DateTime<Utc>,
    }

    impl Event for Ping {
        fn subject(&self) -> &'static str {
            "test.ping"
        }

        fn event_type(&self) -> &'static str {
            "ping"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn publisher(transport: Arc<InMemoryTransport>) -> Publisher {
        Publisher::new(transport, PublisherConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_within_backoff_cap() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_appends(2);
        let publisher = publisher(transport.clone());

        let started = tokio::time::Instant::now();
        let envelope = publisher
            .publish_event(OrganizationId::new(), &Ping { at: Utc::now() })
            .await
            .unwrap();
        let elapsed = started.elapsed();

        // 100ms + 200ms of backoff, each wait under the 2s cap.
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(300) + Duration::from_secs(2));

        let metrics = publisher.metrics();
        assert_eq!(metrics.published, 1);
        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.failed, 0);
        assert!(metrics.last_published_at.is_some());

        let stored = transport.envelopes("test.ping");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id(), envelope.id());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_the_last_error() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_appends(10);
        let publisher = publisher(transport.clone());

        let err = publisher
            .publish_event(OrganizationId::new(), &Ping { at: Utc::now() })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::Exhausted {
                attempts: 4,
                last: TransportError::Unavailable(_)
            }
        ));
        assert_eq!(publisher.metrics().failed, 1);
        assert_eq!(publisher.metrics().retries, 3);
        assert!(transport.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_the_backoff_wait() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_appends(10);
        let (trigger, shutdown) = Shutdown::channel();
        let publisher = Publisher::new(
            transport,
            PublisherConfig::default().with_retry(RetryPolicy::exponential(
                5,
                Duration::from_secs(60),
                Duration::from_secs(60),
            )),
        )
        .with_shutdown(shutdown);

        let started = tokio::time::Instant::now();
        let (result, _) = tokio::join!(
            publisher.publish("test.ping", "ping", OrganizationId::new(), Payload::encode(&1).unwrap()),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                trigger.trigger();
            }
        );

        assert!(matches!(result, Err(PublishError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn caused_by_links_to_parent() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = publisher(transport.clone());
        let parent = publisher
            .publish("test.parent", "parent", OrganizationId::new(), Payload::encode(&1).unwrap())
            .await
            .unwrap();

        let child = publisher
            .publish_caused_by(&parent, &Ping { at: Utc::now() })
            .await
            .unwrap();

        assert_eq!(child.causation_id(), Some(parent.id()));
        assert_eq!(child.correlation_id(), parent.correlation_id());
        assert_eq!(child.organization_id(), parent.organization_id());
        assert_eq!(child.source(), DEFAULT_SOURCE);
    }
}
