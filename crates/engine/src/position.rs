//! Net flow position updates pushed by the execution side.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use ddmrp_buffers::{Buffer, BufferAlertTriggered, BufferStatusChanged, Position};
use ddmrp_core::{ExpectedVersion, OrganizationId, ProductId};
use ddmrp_events::Publisher;

use crate::error::{EngineError, EngineResult};
use crate::providers::BufferRepository;

/// The primary state-transition point of a buffer.
///
/// Replaying an identical position is a no-op: nothing is written and no
/// event is published.
pub struct NfpUpdater {
    buffers: Arc<dyn BufferRepository>,
    publisher: Publisher,
}

impl NfpUpdater {
    pub fn new(buffers: Arc<dyn BufferRepository>, publisher: Publisher) -> Self {
        Self { buffers, publisher }
    }

    #[instrument(skip(self), fields(%organization_id, %product_id), err)]
    pub async fn update_position(
        &self,
        product_id: ProductId,
        organization_id: OrganizationId,
        on_hand: f64,
        on_order: f64,
        qualified_demand: f64,
    ) -> EngineResult<Buffer> {
        let mut buffer = self
            .buffers
            .get_by_product(organization_id, product_id)?
            .ok_or_else(|| EngineError::NotFound(format!("buffer for product {product_id}")))?;
        let position = Position::new(on_hand, on_order, qualified_demand)?;

        let version = buffer.version;
        let now = Utc::now();
        let change = buffer.apply_position(position, now)?;
        if !change.changed {
            debug!(buffer_id = %buffer.id, "position unchanged");
            return Ok(buffer);
        }

        let buffer = self.buffers.upsert(&buffer, ExpectedVersion::Exact(version))?;
        debug!(
            buffer_id = %buffer.id,
            nfp = buffer.net_flow_position,
            zone = %buffer.zone,
            alert_level = %buffer.alert_level,
            "position updated"
        );

        if change.zone_changed() {
            info!(
                buffer_id = %buffer.id,
                old_zone = %change.old_zone,
                new_zone = %change.new_zone,
                "buffer zone changed"
            );
            self.publisher
                .publish_event(organization_id, &BufferStatusChanged::from_change(&buffer, &change, now))
                .await
                .map_err(EngineError::unpublished("position update"))?;
        }

        if change.should_alert() {
            warn!(
                buffer_id = %buffer.id,
                alert_level = %buffer.alert_level,
                replenishment_qty = buffer.replenishment_qty(),
                "buffer alert triggered"
            );
            self.publisher
                .publish_event(organization_id, &BufferAlertTriggered::for_buffer(&buffer, now))
                .await
                .map_err(EngineError::unpublished("position update"))?;
        }

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use ddmrp_buffers::{AlertLevel, Zone, ZoneSizing};
    use ddmrp_core::BufferProfileId;
    use ddmrp_events::subject;

    /// TOR 200, TOY 500, TOG 5750.
    fn seed(h: &Harness) -> ProductId {
        let product = ProductId::new();
        let buffer = Buffer::new(
            product,
            h.org,
            BufferProfileId::new(),
            50.0,
            10,
            ZoneSizing::from_zones(200.0, 0.0, 300.0, 5250.0),
            Utc::now(),
        );
        h.buffers.upsert(&buffer, ExpectedVersion::absent()).unwrap();
        product
    }

    #[tokio::test]
    async fn healthy_position_is_green_and_normal() {
        let h = Harness::new();
        let product = seed(&h);

        let buffer = h
            .updater
            .update_position(product, h.org, 500.0, 100.0, 50.0)
            .await
            .unwrap();

        assert_eq!(buffer.net_flow_position, 550.0);
        assert!((buffer.buffer_penetration - 0.9043).abs() < 1e-3);
        assert_eq!(buffer.zone, Zone::Green);
        assert_eq!(buffer.alert_level, AlertLevel::Normal);
        assert!(h.transport.envelopes(subject::BUFFER_ALERT_TRIGGERED).is_empty());
    }

    #[tokio::test]
    async fn stockout_is_critical_and_alerts() {
        let h = Harness::new();
        let product = seed(&h);
        h.updater
            .update_position(product, h.org, 500.0, 100.0, 50.0)
            .await
            .unwrap();

        let buffer = h
            .updater
            .update_position(product, h.org, 50.0, 0.0, 100.0)
            .await
            .unwrap();

        assert_eq!(buffer.net_flow_position, -50.0);
        assert_eq!(buffer.zone, Zone::BelowRed);
        assert_eq!(buffer.alert_level, AlertLevel::Critical);

        let alerts = h.transport.envelopes(subject::BUFFER_ALERT_TRIGGERED);
        assert_eq!(alerts.len(), 1);
        let alert: BufferAlertTriggered = alerts[0].decode_payload().unwrap();
        assert_eq!(alert.alert_level, AlertLevel::Critical);
        assert_eq!(alert.replenishment_qty, Some(5800.0));
        assert_eq!(alert.buffer_id, buffer.id);

        let changes = h.transport.envelopes(subject::BUFFER_STATUS_CHANGED);
        let last: BufferStatusChanged = changes.last().unwrap().decode_payload().unwrap();
        assert_eq!(last.old_zone, Zone::Green);
        assert_eq!(last.new_zone, Zone::BelowRed);
    }

    #[tokio::test]
    async fn first_stockout_after_sizing_alerts() {
        let h = Harness::new();
        let product = h.product(10.0, 10, 50.0);
        let sized = h.calculator.calculate(product, h.org).await.unwrap();
        assert_eq!(sized.zone, Zone::BelowRed);

        let buffer = h
            .updater
            .update_position(product, h.org, 50.0, 0.0, 100.0)
            .await
            .unwrap();
        assert_eq!(buffer.zone, Zone::BelowRed);
        assert!(h.transport.envelopes(subject::BUFFER_STATUS_CHANGED).is_empty());

        let alerts = h.transport.envelopes(subject::BUFFER_ALERT_TRIGGERED);
        assert_eq!(alerts.len(), 1);
        let alert: BufferAlertTriggered = alerts[0].decode_payload().unwrap();
        assert_eq!(alert.zone, Zone::BelowRed);
        assert_eq!(alert.alert_level, AlertLevel::Critical);
        assert_eq!(alert.nfp, -50.0);
    }

    #[tokio::test]
    async fn identical_replay_is_idempotent() {
        let h = Harness::new();
        let product = seed(&h);

        let first = h
            .updater
            .update_position(product, h.org, 100.0, 0.0, 0.0)
            .await
            .unwrap();
        let published = h.transport.len();

        let second = h
            .updater
            .update_position(product, h.org, 100.0, 0.0, 0.0)
            .await
            .unwrap();

        assert_eq!(second, first);
        assert_eq!(h.transport.len(), published);
        assert_eq!(h.buffers.get_by_product(h.org, product).unwrap().unwrap().version, first.version);
    }

    #[tokio::test]
    async fn movement_within_a_zone_publishes_nothing() {
        let h = Harness::new();
        let product = seed(&h);
        h.updater
            .update_position(product, h.org, 1000.0, 0.0, 0.0)
            .await
            .unwrap();
        let published = h.transport.len();

        let buffer = h
            .updater
            .update_position(product, h.org, 900.0, 0.0, 0.0)
            .await
            .unwrap();
        assert_eq!(buffer.zone, Zone::Green);
        assert_eq!(h.transport.len(), published);
    }

    #[tokio::test]
    async fn negative_input_and_missing_buffer() {
        let h = Harness::new();
        let product = seed(&h);

        let err = h
            .updater
            .update_position(product, h.org, -1.0, 0.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = h
            .updater
            .update_position(ProductId::new(), h.org, 1.0, 0.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(h.transport.is_empty());
    }
}
