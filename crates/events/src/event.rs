use chrono::{DateTime, Utc};

use crate::envelope::SCHEMA_VERSION;

/// A typed event that knows where it is published.
///
/// Events are immutable facts. The serialized form of the implementing type
/// becomes the envelope payload; `event_type` is what receivers dispatch on.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Subject the event is appended under (e.g. "ddmrp.buffer.calculated").
    fn subject(&self) -> &'static str;

    /// Stable type identifier carried in the envelope's `type` field.
    fn event_type(&self) -> &'static str;

    fn schema_version(&self) -> &'static str {
        SCHEMA_VERSION
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
