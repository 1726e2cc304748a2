//! The order-side collaborator the coordinator drives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ddmrp_core::{BufferId, LocationId, OrganizationId, ProductId, SupplierId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Transient advice from the recommender; consumed once, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplenishmentRecommendation {
    pub should_replenish: bool,
    pub quantity: f64,
    pub priority: Priority,
    pub reason: String,
    pub supplier_id: Option<SupplierId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplenishmentRequest {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub location_id: Option<LocationId>,
    pub quantity: f64,
    pub priority: Priority,
    pub supplier_id: Option<SupplierId>,
    pub source_buffer_id: BufferId,
    /// Id of the alert envelope that caused the request.
    pub trigger_event_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplenishmentResponse {
    pub order_id: String,
    pub order_type: String,
    pub order_number: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("replenishment service error: {0}")]
pub struct ServiceError(pub String);

/// Recommender plus order creation, owned by the execution side.
#[async_trait]
pub trait ReplenishmentService: Send + Sync {
    async fn evaluate_replenishment(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        location_id: Option<LocationId>,
    ) -> Result<ReplenishmentRecommendation, ServiceError>;

    async fn create_replenishment_order(
        &self,
        request: &ReplenishmentRequest,
    ) -> Result<ReplenishmentResponse, ServiceError>;
}
