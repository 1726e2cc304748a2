use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ddmrp_core::{BufferId, LocationId, OrganizationId, ProductId};
use ddmrp_events::{Event, subject};

use crate::service::{Priority, ReplenishmentRequest, ReplenishmentResponse};

pub const TYPE_REPLENISHMENT_ORDER_CREATED: &str = "replenishment.order_created";

/// An automatic replenishment order was created for a critical alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplenishmentOrderCreated {
    pub order_id: String,
    pub order_number: String,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    pub quantity: f64,
    pub priority: Priority,
    pub source_buffer_id: BufferId,
    pub trigger_event_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ReplenishmentOrderCreated {
    pub fn new(request: &ReplenishmentRequest, response: &ReplenishmentResponse) -> Self {
        Self {
            order_id: response.order_id.clone(),
            order_number: response.order_number.clone(),
            organization_id: request.organization_id,
            product_id: request.product_id,
            location_id: request.location_id,
            quantity: request.quantity,
            priority: request.priority,
            source_buffer_id: request.source_buffer_id,
            trigger_event_id: request.trigger_event_id,
            created_at: response.created_at,
        }
    }
}

impl Event for ReplenishmentOrderCreated {
    fn subject(&self) -> &'static str {
        subject::REPLENISHMENT_ORDER_CREATED
    }

    fn event_type(&self) -> &'static str {
        TYPE_REPLENISHMENT_ORDER_CREATED
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
