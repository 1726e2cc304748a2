//! Zone-level buffer adjustment use cases.
//!
//! Adjustments take effect on the buffer's next calculation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use ddmrp_buffers::{BufferAdjustment, NewBufferAdjustment};
use ddmrp_core::{BufferAdjustmentId, BufferId, OrganizationId};

use crate::error::{EngineError, EngineResult};
use crate::providers::{BufferAdjustmentRepository, BufferRepository};

pub struct BufferAdjustmentRegistry {
    repo: Arc<dyn BufferAdjustmentRepository>,
    buffers: Arc<dyn BufferRepository>,
}

impl BufferAdjustmentRegistry {
    pub fn new(repo: Arc<dyn BufferAdjustmentRepository>, buffers: Arc<dyn BufferRepository>) -> Self {
        Self { repo, buffers }
    }

    /// The target buffer must exist in the organization and belong to the
    /// adjustment's product.
    #[instrument(
        skip(self, input),
        fields(organization_id = %input.organization_id, buffer_id = %input.buffer_id),
        err
    )]
    pub fn create(&self, input: NewBufferAdjustment) -> EngineResult<BufferAdjustment> {
        let adjustment = input.into_adjustment(Utc::now())?;
        let buffer = self
            .buffers
            .get_by_id(adjustment.organization_id, adjustment.buffer_id)?;
        if buffer.product_id != adjustment.product_id {
            return Err(EngineError::Validation(
                "product_id does not match the buffer".to_string(),
            ));
        }

        self.repo.create(&adjustment)?;
        info!(
            adjustment_id = %adjustment.id,
            target_zone = ?adjustment.target_zone,
            factor = adjustment.factor,
            "buffer adjustment created"
        );
        Ok(adjustment)
    }

    #[instrument(skip(self), fields(%organization_id, %id), err)]
    pub fn delete(&self, organization_id: OrganizationId, id: BufferAdjustmentId) -> EngineResult<()> {
        self.repo.delete(organization_id, id)?;
        info!("buffer adjustment deleted");
        Ok(())
    }

    pub fn get(
        &self,
        organization_id: OrganizationId,
        id: BufferAdjustmentId,
    ) -> EngineResult<BufferAdjustment> {
        Ok(self.repo.get_by_id(organization_id, id)?)
    }

    pub fn list_by_buffer(
        &self,
        organization_id: OrganizationId,
        buffer_id: BufferId,
    ) -> EngineResult<Vec<BufferAdjustment>> {
        Ok(self.repo.list_by_buffer(organization_id, buffer_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use ddmrp_buffers::{BufferAdjustmentType, TargetZone};
    use ddmrp_core::{ProductId, UserId};

    fn input(h: &Harness, buffer_id: BufferId, product_id: ProductId) -> NewBufferAdjustment {
        let today = Utc::now().date_naive();
        NewBufferAdjustment {
            buffer_id,
            product_id,
            organization_id: h.org,
            adjustment_type: BufferAdjustmentType::SpikeManagement,
            target_zone: TargetZone::Red,
            factor: 1.5,
            start_date: today,
            end_date: today + chrono::Days::new(7),
            reason: "supplier strike".into(),
            created_by: UserId::new(),
        }
    }

    #[test]
    fn create_list_delete() {
        let h = Harness::new();
        let buffer = h.seed_buffer(ProductId::new());

        let adj = h
            .zone_adjustments
            .create(input(&h, buffer.id, buffer.product_id))
            .unwrap();
        assert_eq!(h.zone_adjustments.list_by_buffer(h.org, buffer.id).unwrap(), vec![adj.clone()]);

        h.zone_adjustments.delete(h.org, adj.id).unwrap();
        assert!(h.zone_adjustments.list_by_buffer(h.org, buffer.id).unwrap().is_empty());
        assert!(matches!(
            h.zone_adjustments.get(h.org, adj.id),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_or_mismatched_buffer_is_rejected() {
        let h = Harness::new();
        let buffer = h.seed_buffer(ProductId::new());

        let err = h
            .zone_adjustments
            .create(input(&h, BufferId::new(), buffer.product_id))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = h
            .zone_adjustments
            .create(input(&h, buffer.id, ProductId::new()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let other_org = h.second_organization();
        let mut foreign = input(&h, buffer.id, buffer.product_id);
        foreign.organization_id = other_org;
        assert!(matches!(
            h.zone_adjustments.create(foreign),
            Err(EngineError::NotFound(_))
        ));
    }
}
