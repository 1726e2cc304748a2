//! Event transport mechanics for the DDMRP engine.
//!
//! - [`EventEnvelope`] is the wire unit: metadata plus an opaque JSON payload.
//! - [`Transport`] is a durable, subject-addressed log with named consumers.
//! - [`Publisher`] wraps and appends with bounded exponential backoff.
//! - [`Subscriber`] pulls batches into a bounded queue drained by a fixed worker pool.
//!
//! Delivery is at-least-once; handlers must be idempotent.

pub mod envelope;
pub mod event;
pub mod memory;
pub mod publisher;
pub mod retry;
pub mod shutdown;
pub mod subject;
pub mod subscriber;
pub mod transport;

pub use envelope::{EnvelopeError, EventEnvelope, Payload, SCHEMA_VERSION};
pub use event::Event;
pub use memory::InMemoryTransport;
pub use publisher::{PublishError, Publisher, PublisherConfig, PublisherMetrics};
pub use retry::RetryPolicy;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use subject::matches as subject_matches;
pub use subscriber::{
    Disposition, EventHandler, HandlerError, Subscriber, SubscriberConfig, SubscriberHandle, SubscriberMetrics,
};
pub use transport::{ConsumerConfig, Delivery, Transport, TransportError};
