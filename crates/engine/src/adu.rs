//! ADU calculation use cases.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use ddmrp_buffers::{AduCalculated, AduCalculation, NewAduCalculation};
use ddmrp_core::{OrganizationId, ProductId};
use ddmrp_events::Publisher;

use crate::error::{EngineError, EngineResult};
use crate::providers::{AduRepository, BufferRepository};

/// History length returned when the caller asks for zero entries.
pub const DEFAULT_HISTORY_LIMIT: usize = 30;

pub(crate) fn history_limit(limit: usize) -> usize {
    if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit }
}

pub struct AduCalculator {
    adus: Arc<dyn AduRepository>,
    buffers: Arc<dyn BufferRepository>,
    publisher: Publisher,
}

impl AduCalculator {
    pub fn new(
        adus: Arc<dyn AduRepository>,
        buffers: Arc<dyn BufferRepository>,
        publisher: Publisher,
    ) -> Self {
        Self {
            adus,
            buffers,
            publisher,
        }
    }

    /// Compute, store, and announce an ADU. A second run on the same day
    /// replaces the first.
    #[instrument(
        skip(self, input),
        fields(organization_id = %input.organization_id, product_id = %input.product_id, method = %input.method),
        err
    )]
    pub async fn calculate(&self, input: NewAduCalculation) -> EngineResult<AduCalculation> {
        let (organization_id, product_id) = (input.organization_id, input.product_id);
        let calculation = input.into_calculation(Utc::now())?;
        let previous = self.adus.get_latest(organization_id, product_id)?;

        self.adus.save(&calculation)?;
        info!(
            adu = calculation.adu_value,
            points = calculation.data_point_count,
            "adu calculated"
        );

        let buffer = self.buffers.get_by_product(organization_id, product_id)?;
        let event = AduCalculated::new(
            &calculation,
            buffer.as_ref(),
            previous.map(|p| p.adu_value),
        );
        self.publisher
            .publish_event(organization_id, &event)
            .await
            .map_err(EngineError::unpublished("adu calculation"))?;
        Ok(calculation)
    }

    pub fn latest(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> EngineResult<AduCalculation> {
        self.adus
            .get_latest(organization_id, product_id)?
            .ok_or_else(|| EngineError::NotFound(format!("ADU calculation for product {product_id}")))
    }

    /// Newest first; a zero `limit` means [`DEFAULT_HISTORY_LIMIT`].
    pub fn history(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        limit: usize,
    ) -> EngineResult<Vec<AduCalculation>> {
        Ok(self
            .adus
            .list_history(organization_id, product_id, history_limit(limit))?)
    }
}
