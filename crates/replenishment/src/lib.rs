//! Automatic replenishment: reacts to critical buffer alerts by asking the
//! execution side for a recommendation and, when advised, an order.

pub mod coordinator;
pub mod events;
pub mod service;

pub use coordinator::{AlertOutcome, CoordinatorMetrics, ReplenishmentCoordinator, SkipReason};
pub use events::{ReplenishmentOrderCreated, TYPE_REPLENISHMENT_ORDER_CREATED};
pub use service::{
    Priority, ReplenishmentRecommendation, ReplenishmentRequest, ReplenishmentResponse,
    ReplenishmentService, ServiceError,
};
