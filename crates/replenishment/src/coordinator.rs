//! Cross-service reactor turning critical buffer alerts into replenishment
//! orders.
//!
//! An alert is acknowledged once it has been *processed*, whether or not an
//! order came out of it: recommender and order-creation failures are logged
//! and swallowed, because redelivering the alert would retry a side effect
//! that is not idempotent. Only an undecodable payload is rejected.
//!
//! Duplicate deliveries of the same alert are not de-duplicated and can
//! create duplicate orders.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use ddmrp_buffers::{AlertLevel, BufferAlertTriggered, DdmrpEvent, EventDecodeError};
use ddmrp_core::OrganizationSettingsStore;
use ddmrp_events::{EventEnvelope, EventHandler, HandlerError, Publisher};

use crate::events::ReplenishmentOrderCreated;
use crate::service::{ReplenishmentRequest, ReplenishmentResponse, ReplenishmentService};

/// Why an alert did not lead to an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotCritical,
    AutoReplenishmentDisabled,
    NotRecommended,
}

/// What processing an alert led to.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Skipped(SkipReason),
    OrderCreated(ReplenishmentResponse),
    /// The recommender or order creation failed; logged and swallowed.
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetrics {
    pub alerts_received: u64,
    pub orders_created: u64,
    pub skipped: u64,
    pub failures: u64,
}

pub struct ReplenishmentCoordinator {
    service: Arc<dyn ReplenishmentService>,
    settings: Arc<OrganizationSettingsStore>,
    publisher: Option<Publisher>,
    metrics: Mutex<CoordinatorMetrics>,
}

impl ReplenishmentCoordinator {
    pub fn new(service: Arc<dyn ReplenishmentService>, settings: Arc<OrganizationSettingsStore>) -> Self {
        Self {
            service,
            settings,
            publisher: None,
            metrics: Mutex::new(CoordinatorMetrics::default()),
        }
    }

    /// Announce created orders on `execution.replenishment.order_created`.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut CoordinatorMetrics)) {
        if let Ok(mut m) = self.metrics.lock() {
            f(&mut m);
        }
    }

    /// Decide on, and possibly act on, one alert.
    pub async fn process_alert(
        &self,
        envelope: &EventEnvelope,
        alert: &BufferAlertTriggered,
    ) -> AlertOutcome {
        self.record(|m| m.alerts_received += 1);
        info!(
            buffer_id = %alert.buffer_id,
            product_id = %alert.product_id,
            alert_type = %alert.alert_type,
            alert_level = %alert.alert_level,
            zone = %alert.zone,
            nfp = alert.nfp,
            "buffer alert received"
        );

        let outcome = self.decide(envelope, alert).await;
        match &outcome {
            AlertOutcome::Skipped(reason) => {
                debug!(buffer_id = %alert.buffer_id, ?reason, "no automatic replenishment");
                self.record(|m| m.skipped += 1);
            }
            AlertOutcome::OrderCreated(_) => self.record(|m| m.orders_created += 1),
            AlertOutcome::Failed(_) => self.record(|m| m.failures += 1),
        }
        outcome
    }

    async fn decide(&self, envelope: &EventEnvelope, alert: &BufferAlertTriggered) -> AlertOutcome {
        if alert.alert_level != AlertLevel::Critical {
            return AlertOutcome::Skipped(SkipReason::NotCritical);
        }
        if !self.settings.auto_replenishment_enabled(alert.organization_id) {
            return AlertOutcome::Skipped(SkipReason::AutoReplenishmentDisabled);
        }

        let recommendation = match self
            .service
            .evaluate_replenishment(alert.organization_id, alert.product_id, alert.location_id)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(product_id = %alert.product_id, error = %e, "failed to evaluate replenishment");
                return AlertOutcome::Failed(e.to_string());
            }
        };

        if !recommendation.should_replenish {
            debug!(product_id = %alert.product_id, reason = %recommendation.reason, "replenishment not recommended");
            return AlertOutcome::Skipped(SkipReason::NotRecommended);
        }

        let request = ReplenishmentRequest {
            organization_id: alert.organization_id,
            product_id: alert.product_id,
            location_id: alert.location_id,
            quantity: recommendation.quantity,
            priority: recommendation.priority,
            supplier_id: recommendation.supplier_id,
            source_buffer_id: alert.buffer_id,
            trigger_event_id: envelope.id(),
        };

        let response = match self.service.create_replenishment_order(&request).await {
            Ok(r) => r,
            Err(e) => {
                error!(product_id = %alert.product_id, error = %e, "failed to create replenishment order");
                return AlertOutcome::Failed(e.to_string());
            }
        };

        info!(
            order_id = %response.order_id,
            order_number = %response.order_number,
            product_id = %alert.product_id,
            quantity = request.quantity,
            "automatic replenishment order created"
        );

        if let Some(publisher) = &self.publisher {
            let event = ReplenishmentOrderCreated::new(&request, &response);
            if let Err(e) = publisher.publish_caused_by(envelope, &event).await {
                warn!(order_id = %response.order_id, error = %e, "order created but not announced");
            }
        }

        AlertOutcome::OrderCreated(response)
    }
}

#[async_trait]
impl EventHandler for ReplenishmentCoordinator {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let event = match DdmrpEvent::decode(envelope) {
            Ok(event) => event,
            Err(EventDecodeError::UnknownType(t)) => {
                debug!(event_type = %t, "ignoring unhandled event type");
                return Ok(());
            }
            Err(e @ EventDecodeError::Payload { .. }) => {
                return Err(HandlerError::Poison(e.to_string()));
            }
        };

        match event {
            DdmrpEvent::BufferAlertTriggered(alert) => {
                self.process_alert(envelope, &alert).await;
            }
            DdmrpEvent::BufferStatusChanged(change) => {
                if change.new_zone.is_red_or_below() && !change.old_zone.is_red_or_below() {
                    warn!(
                        product_id = %change.product_id,
                        nfp = change.new_nfp,
                        "product entered red zone, orders may need expediting"
                    );
                }
            }
            other => {
                debug!(event_type = %envelope.event_type(), organization_id = %other.organization_id(), "event noted");
            }
        }
        Ok(())
    }
}
