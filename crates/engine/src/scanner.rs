use std::sync::Arc;

use tracing::instrument;

use ddmrp_buffers::Buffer;
use ddmrp_core::OrganizationId;

use crate::error::EngineResult;
use crate::providers::BufferRepository;

/// Read-only view of the buffers that currently need action.
pub struct ReplenishmentScanner {
    buffers: Arc<dyn BufferRepository>,
}

impl ReplenishmentScanner {
    pub fn new(buffers: Arc<dyn BufferRepository>) -> Self {
        Self { buffers }
    }

    /// Buffers in red or below (or at an actionable alert level), most
    /// depleted first: below-red before red, then ascending NFP.
    ///
    /// Reflects the last persisted state; nothing is recomputed.
    #[instrument(skip(self), fields(%organization_id), err)]
    pub fn check_replenishment(&self, organization_id: OrganizationId) -> EngineResult<Vec<Buffer>> {
        let mut candidates: Vec<Buffer> = self
            .buffers
            .list(organization_id)?
            .into_iter()
            .filter(Buffer::needs_replenishment)
            .collect();

        candidates.sort_by(|a, b| {
            a.zone
                .depletion_rank()
                .cmp(&b.zone.depletion_rank())
                .then(a.net_flow_position.total_cmp(&b.net_flow_position))
        });
        Ok(candidates)
    }
}
