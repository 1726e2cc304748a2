//! Events emitted by the buffer engine.
//!
//! Each payload type implements [`Event`]; [`DdmrpEvent`] is the closed set
//! receivers decode into, dispatching on the envelope's `type` field.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ddmrp_core::{
    AdjustmentId, AduCalculationId, BufferId, BufferProfileId, LocationId, OrganizationId,
    ProductId, UserId,
};
use ddmrp_events::{Event, EventEnvelope, subject};

use crate::adjustment::{AdjustmentType, DemandAdjustment};
use crate::adu::{AduCalculation, AduMethod};
use crate::buffer::{Buffer, PositionChange};
use crate::profile::BufferProfile;
use crate::zones::{AlertLevel, Zone};

pub const TYPE_BUFFER_CREATED: &str = "buffer.created";
pub const TYPE_BUFFER_CALCULATED: &str = "buffer.calculated";
pub const TYPE_BUFFER_STATUS_CHANGED: &str = "buffer.status_changed";
pub const TYPE_BUFFER_ZONE_CHANGED: &str = "buffer.zone_changed";
pub const TYPE_BUFFER_ALERT_TRIGGERED: &str = "buffer.alert_triggered";
pub const TYPE_FAD_CREATED: &str = "fad.created";
pub const TYPE_FAD_UPDATED: &str = "fad.updated";
pub const TYPE_FAD_DELETED: &str = "fad.deleted";
pub const TYPE_FAD_APPLIED: &str = "fad.applied";
pub const TYPE_ADU_CALCULATED: &str = "adu.calculated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferCreated {
    pub buffer_id: BufferId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    pub buffer_profile_id: BufferProfileId,
    pub tor: f64,
    pub toy: f64,
    pub tog: f64,
    pub created_at: DateTime<Utc>,
}

impl BufferCreated {
    pub fn from_buffer(buffer: &Buffer) -> Self {
        Self {
            buffer_id: buffer.id,
            organization_id: buffer.organization_id,
            product_id: buffer.product_id,
            location_id: buffer.location_id,
            buffer_profile_id: buffer.buffer_profile_id,
            tor: buffer.top_of_red(),
            toy: buffer.top_of_yellow(),
            tog: buffer.top_of_green(),
            created_at: buffer.created_at,
        }
    }
}

/// Full sizing snapshot after a (re)calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferCalculated {
    pub buffer_id: BufferId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    /// Decoupled lead time in days.
    pub dlt: u32,
    /// Unadjusted average daily usage.
    pub adu: f64,
    pub lead_time_factor: f64,
    pub variability_factor: f64,
    pub red_zone_base: f64,
    pub red_zone_safety: f64,
    pub red_zone: f64,
    pub yellow_zone: f64,
    pub green_zone: f64,
    /// Adjusted daily usage the zones were sized from.
    pub cpd: f64,
    pub tog: f64,
    pub tor: f64,
    pub toy: f64,
    pub on_hand_qty: f64,
    pub open_po_qty: f64,
    pub open_so_qty: f64,
    pub net_flow_position: f64,
    pub calculated_at: DateTime<Utc>,
}

impl BufferCalculated {
    pub fn new(buffer: &Buffer, profile: &BufferProfile, adu: f64) -> Self {
        let s = &buffer.sizing;
        Self {
            buffer_id: buffer.id,
            organization_id: buffer.organization_id,
            product_id: buffer.product_id,
            location_id: buffer.location_id,
            dlt: buffer.ltd,
            adu,
            lead_time_factor: profile.lead_time_factor,
            variability_factor: profile.variability_factor,
            red_zone_base: s.red_base,
            red_zone_safety: s.red_safe,
            red_zone: s.red_zone,
            yellow_zone: s.yellow_zone,
            green_zone: s.green_zone,
            cpd: buffer.cpd,
            tog: s.top_of_green,
            tor: s.top_of_red,
            toy: s.top_of_yellow,
            on_hand_qty: buffer.on_hand,
            open_po_qty: buffer.on_order,
            open_so_qty: buffer.qualified_demand,
            net_flow_position: buffer.net_flow_position,
            calculated_at: buffer.last_recalculated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStatusChanged {
    pub buffer_id: BufferId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    pub old_zone: Zone,
    pub new_zone: Zone,
    pub old_nfp: f64,
    pub new_nfp: f64,
    pub alert_level: AlertLevel,
    pub tog: f64,
    pub toy: f64,
    pub tor: f64,
    pub changed_at: DateTime<Utc>,
}

impl BufferStatusChanged {
    pub fn new(buffer: &Buffer, old_zone: Zone, old_nfp: f64, at: DateTime<Utc>) -> Self {
        Self {
            buffer_id: buffer.id,
            organization_id: buffer.organization_id,
            product_id: buffer.product_id,
            location_id: buffer.location_id,
            old_zone,
            new_zone: buffer.zone,
            old_nfp,
            new_nfp: buffer.net_flow_position,
            alert_level: buffer.alert_level,
            tog: buffer.top_of_green(),
            toy: buffer.top_of_yellow(),
            tor: buffer.top_of_red(),
            changed_at: at,
        }
    }

    pub fn from_change(buffer: &Buffer, change: &PositionChange, at: DateTime<Utc>) -> Self {
        Self::new(buffer, change.old_zone, change.old_nfp, at)
    }
}

/// Zone transition with its cause ("recalculation", "position_update").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferZoneChanged {
    #[serde(flatten)]
    pub status: BufferStatusChanged,
    pub transition_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferAlertTriggered {
    pub buffer_id: BufferId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    pub alert_type: String,
    pub alert_level: AlertLevel,
    pub zone: Zone,
    pub nfp: f64,
    pub tog: f64,
    pub toy: f64,
    pub tor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replenishment_qty: Option<f64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    pub triggered_at: DateTime<Utc>,
}

impl BufferAlertTriggered {
    /// Alert for a buffer sitting in red or below.
    pub fn for_buffer(buffer: &Buffer, at: DateTime<Utc>) -> Self {
        let alert_type = match buffer.zone {
            Zone::BelowRed => "buffer_below_red",
            _ => "buffer_red",
        };
        let replenishment_qty = buffer
            .zone
            .is_red_or_below()
            .then(|| buffer.top_of_green() - buffer.net_flow_position);
        Self {
            buffer_id: buffer.id,
            organization_id: buffer.organization_id,
            product_id: buffer.product_id,
            location_id: buffer.location_id,
            alert_type: alert_type.to_string(),
            alert_level: buffer.alert_level,
            zone: buffer.zone,
            nfp: buffer.net_flow_position,
            tog: buffer.top_of_green(),
            toy: buffer.top_of_yellow(),
            tor: buffer.top_of_red(),
            replenishment_qty,
            message: format!(
                "buffer entered {} zone (nfp {:.2}, top of red {:.2})",
                buffer.zone,
                buffer.net_flow_position,
                buffer.top_of_red()
            ),
            metadata: None,
            triggered_at: at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadCreated {
    pub fad_id: AdjustmentId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub adjustment_type: AdjustmentType,
    pub factor: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl FadCreated {
    pub fn from_adjustment(adj: &DemandAdjustment) -> Self {
        Self {
            fad_id: adj.id,
            organization_id: adj.organization_id,
            product_id: adj.product_id,
            adjustment_type: adj.adjustment_type,
            factor: adj.factor,
            start_date: adj.start_date,
            end_date: adj.end_date,
            reason: adj.reason.clone(),
            created_by: adj.created_by,
            created_at: adj.created_at,
        }
    }
}

/// Snapshot of the adjustment after the update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadUpdated {
    pub fad_id: AdjustmentId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub adjustment_type: AdjustmentType,
    pub factor: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl FadUpdated {
    pub fn from_adjustment(adj: &DemandAdjustment) -> Self {
        Self {
            fad_id: adj.id,
            organization_id: adj.organization_id,
            product_id: adj.product_id,
            adjustment_type: adj.adjustment_type,
            factor: adj.factor,
            start_date: adj.start_date,
            end_date: adj.end_date,
            reason: adj.reason.clone(),
            updated_at: adj.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadDeleted {
    pub fad_id: AdjustmentId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub deleted_at: DateTime<Utc>,
}

impl FadDeleted {
    pub fn new(adj: &DemandAdjustment, at: DateTime<Utc>) -> Self {
        Self {
            fad_id: adj.id,
            organization_id: adj.organization_id,
            product_id: adj.product_id,
            deleted_at: at,
        }
    }
}

/// A demand adjustment shaped a buffer calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadApplied {
    pub fad_id: AdjustmentId,
    pub buffer_id: BufferId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub factor: f64,
    /// Change in daily usage this factor alone causes on the base ADU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_on_adu: Option<f64>,
    pub applied_at: DateTime<Utc>,
}

impl FadApplied {
    pub fn new(adj: &DemandAdjustment, buffer: &Buffer, base_adu: f64, at: DateTime<Utc>) -> Self {
        Self {
            fad_id: adj.id,
            buffer_id: buffer.id,
            organization_id: buffer.organization_id,
            product_id: buffer.product_id,
            factor: adj.factor,
            impact_on_adu: Some(base_adu * (adj.factor - 1.0)),
            applied_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AduCalculated {
    pub calculation_id: AduCalculationId,
    /// Unset when the product has no buffer yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_id: Option<BufferId>,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    pub adu: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_adu: Option<f64>,
    pub calculation_method: AduMethod,
    pub period_days: u32,
    pub data_point_count: usize,
    pub calculated_at: DateTime<Utc>,
}

impl AduCalculated {
    pub fn new(calc: &AduCalculation, buffer: Option<&Buffer>, previous_adu: Option<f64>) -> Self {
        Self {
            calculation_id: calc.id,
            buffer_id: buffer.map(|b| b.id),
            organization_id: calc.organization_id,
            product_id: calc.product_id,
            location_id: buffer.and_then(|b| b.location_id),
            adu: calc.adu_value,
            previous_adu,
            calculation_method: calc.method,
            period_days: calc.period_days,
            data_point_count: calc.data_point_count,
            calculated_at: calc.created_at,
        }
    }
}

macro_rules! impl_event {
    ($t:ty, $subject:expr, $type:expr, $at:ident $(. $rest:ident)*) => {
        impl Event for $t {
            fn subject(&self) -> &'static str {
                $subject
            }

            fn event_type(&self) -> &'static str {
                $type
            }

            fn occurred_at(&self) -> DateTime<Utc> {
                self.$at $(. $rest)*
            }
        }
    };
}

impl_event!(BufferCreated, subject::BUFFER_CREATED, TYPE_BUFFER_CREATED, created_at);
impl_event!(BufferCalculated, subject::BUFFER_CALCULATED, TYPE_BUFFER_CALCULATED, calculated_at);
impl_event!(BufferStatusChanged, subject::BUFFER_STATUS_CHANGED, TYPE_BUFFER_STATUS_CHANGED, changed_at);
impl_event!(BufferZoneChanged, subject::BUFFER_ZONE_CHANGED, TYPE_BUFFER_ZONE_CHANGED, status.changed_at);
impl_event!(BufferAlertTriggered, subject::BUFFER_ALERT_TRIGGERED, TYPE_BUFFER_ALERT_TRIGGERED, triggered_at);
impl_event!(FadCreated, subject::FAD_CREATED, TYPE_FAD_CREATED, created_at);
impl_event!(FadUpdated, subject::FAD_UPDATED, TYPE_FAD_UPDATED, updated_at);
impl_event!(FadDeleted, subject::FAD_DELETED, TYPE_FAD_DELETED, deleted_at);
impl_event!(FadApplied, subject::FAD_APPLIED, TYPE_FAD_APPLIED, applied_at);
impl_event!(AduCalculated, subject::ADU_CALCULATED, TYPE_ADU_CALCULATED, calculated_at);

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("invalid {event_type} payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Every event the engine emits.
///
/// Serializes as the bare payload; the variant is carried by the envelope
/// `type`, never inside the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DdmrpEvent {
    BufferCreated(BufferCreated),
    BufferCalculated(BufferCalculated),
    BufferStatusChanged(BufferStatusChanged),
    BufferZoneChanged(BufferZoneChanged),
    BufferAlertTriggered(BufferAlertTriggered),
    FadCreated(FadCreated),
    FadUpdated(FadUpdated),
    FadDeleted(FadDeleted),
    FadApplied(FadApplied),
    AduCalculated(AduCalculated),
}

impl DdmrpEvent {
    /// Decode an envelope by dispatching on its `type`.
    pub fn decode(envelope: &EventEnvelope) -> Result<Self, EventDecodeError> {
        fn payload<T: serde::de::DeserializeOwned>(
            envelope: &EventEnvelope,
        ) -> Result<T, EventDecodeError> {
            envelope
                .decode_payload()
                .map_err(|source| EventDecodeError::Payload {
                    event_type: envelope.event_type().to_string(),
                    source,
                })
        }

        Ok(match envelope.event_type() {
            TYPE_BUFFER_CREATED => Self::BufferCreated(payload(envelope)?),
            TYPE_BUFFER_CALCULATED => Self::BufferCalculated(payload(envelope)?),
            TYPE_BUFFER_STATUS_CHANGED => Self::BufferStatusChanged(payload(envelope)?),
            TYPE_BUFFER_ZONE_CHANGED => Self::BufferZoneChanged(payload(envelope)?),
            TYPE_BUFFER_ALERT_TRIGGERED => Self::BufferAlertTriggered(payload(envelope)?),
            TYPE_FAD_CREATED => Self::FadCreated(payload(envelope)?),
            TYPE_FAD_UPDATED => Self::FadUpdated(payload(envelope)?),
            TYPE_FAD_DELETED => Self::FadDeleted(payload(envelope)?),
            TYPE_FAD_APPLIED => Self::FadApplied(payload(envelope)?),
            TYPE_ADU_CALCULATED => Self::AduCalculated(payload(envelope)?),
            other => return Err(EventDecodeError::UnknownType(other.to_string())),
        })
    }

    pub fn organization_id(&self) -> OrganizationId {
        match self {
            Self::BufferCreated(e) => e.organization_id,
            Self::BufferCalculated(e) => e.organization_id,
            Self::BufferStatusChanged(e) => e.organization_id,
            Self::BufferZoneChanged(e) => e.status.organization_id,
            Self::BufferAlertTriggered(e) => e.organization_id,
            Self::FadCreated(e) => e.organization_id,
            Self::FadUpdated(e) => e.organization_id,
            Self::FadDeleted(e) => e.organization_id,
            Self::FadApplied(e) => e.organization_id,
            Self::AduCalculated(e) => e.organization_id,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident) => {
        match $self {
            DdmrpEvent::BufferCreated(e) => Event::$method(e),
            DdmrpEvent::BufferCalculated(e) => Event::$method(e),
            DdmrpEvent::BufferStatusChanged(e) => Event::$method(e),
            DdmrpEvent::BufferZoneChanged(e) => Event::$method(e),
            DdmrpEvent::BufferAlertTriggered(e) => Event::$method(e),
            DdmrpEvent::FadCreated(e) => Event::$method(e),
            DdmrpEvent::FadUpdated(e) => Event::$method(e),
            DdmrpEvent::FadDeleted(e) => Event::$method(e),
            DdmrpEvent::FadApplied(e) => Event::$method(e),
            DdmrpEvent::AduCalculated(e) => Event::$method(e),
        }
    };
}

impl Event for DdmrpEvent {
    fn subject(&self) -> &'static str {
        dispatch!(self, subject)
    }

    fn event_type(&self) -> &'static str {
        dispatch!(self, event_type)
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        dispatch!(self, occurred_at)
    }
}

macro_rules! impl_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for DdmrpEvent {
                fn from(value: $variant) -> Self {
                    DdmrpEvent::$variant(value)
                }
            }
        )*
    };
}

impl_from!(
    BufferCreated,
    BufferCalculated,
    BufferStatusChanged,
    BufferZoneChanged,
    BufferAlertTriggered,
    FadCreated,
    FadUpdated,
    FadDeleted,
    FadApplied,
    AduCalculated,
);
