use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use uuid::Uuid;

use ddmrp_core::OrganizationId;

/// Schema version stamped on every envelope this service produces.
pub const SCHEMA_VERSION: &str = "1.0";

/// Opaque event payload.
///
/// Holds the already-encoded JSON bytes of the event body. On the wire it is
/// embedded verbatim as a JSON value (not as a string or byte array), so the
/// receiving side decodes it lazily into the concrete event type.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Encode a serializable value as the payload body.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(Self)
    }

    /// Wrap bytes that are already JSON.
    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Payload")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: &RawValue =
            serde_json::from_slice(&self.0).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(Self(raw.get().as_bytes().to_vec()))
    }
}

/// Envelope validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Standard wrapper for every event crossing a service boundary.
///
/// - `correlation_id` links a causal chain; a fresh envelope correlates to itself.
/// - `causation_id` names the envelope that directly caused this one.
/// - `event_type` is serialized as `type` and drives payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    id: Uuid,
    subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<Uuid>,
    organization_id: OrganizationId,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    schema_version: String,
    timestamp: DateTime<Utc>,
    payload: Payload,
}

impl EventEnvelope {
    pub fn new(
        subject: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
        organization_id: OrganizationId,
        payload: Payload,
    ) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            subject: subject.into(),
            correlation_id: Some(id),
            causation_id: None,
            organization_id,
            source: source.into(),
            event_type: event_type.into(),
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Continue the causal chain of `parent`: same correlation, caused by `parent`.
    pub fn caused_by(mut self, parent: &EventEnvelope) -> Self {
        self.correlation_id = Some(parent.correlation_id());
        self.causation_id = Some(parent.id);
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = schema_version.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Correlation id; envelopes that arrived without one correlate to themselves.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id.unwrap_or(self.id)
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.causation_id
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.payload.decode()
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.id.is_nil() {
            return Err(EnvelopeError::Missing("id"));
        }
        if self.subject.is_empty() {
            return Err(EnvelopeError::Missing("subject"));
        }
        if self.organization_id.is_nil() {
            return Err(EnvelopeError::Missing("organization_id"));
        }
        if self.source.is_empty() {
            return Err(EnvelopeError::Missing("source"));
        }
        if self.event_type.is_empty() {
            return Err(EnvelopeError::Missing("type"));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
