//! Buffer sizing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use ddmrp_buffers::{
    Buffer, BufferAdjustment, BufferCalculated, BufferCreated, BufferHistory, BufferStatusChanged,
    BufferZoneChanged, DemandAdjustment, FadApplied, SizingInputs, ZoneSizing, active_factor,
    adjusted_daily_usage, apply_zone_adjustments,
};
use ddmrp_core::{BufferId, ExpectedVersion, OrganizationId, ProductId};
use ddmrp_events::Publisher;

use crate::adu::history_limit;
use crate::error::{EngineError, EngineResult};
use crate::providers::{
    AduRepository, BufferAdjustmentRepository, BufferHistoryRepository, BufferRepository,
    CatalogClient, DemandAdjustmentRepository,
};

pub const RECALCULATION_REASON: &str = "recalculation";

/// Derives zone thresholds from profile, adjusted consumption, and lead time.
///
/// The base consumption is the latest stored ADU rounded up to a whole unit.
/// Zero-width buffers are refused: a non-positive adjusted daily usage or
/// lead time fails with a validation error instead of producing zones of
/// size zero.
pub struct BufferCalculator {
    buffers: Arc<dyn BufferRepository>,
    adjustments: Arc<dyn DemandAdjustmentRepository>,
    zone_adjustments: Arc<dyn BufferAdjustmentRepository>,
    history: Arc<dyn BufferHistoryRepository>,
    adus: Arc<dyn AduRepository>,
    catalog: Arc<dyn CatalogClient>,
    publisher: Publisher,
}

impl BufferCalculator {
    pub fn new(
        buffers: Arc<dyn BufferRepository>,
        adjustments: Arc<dyn DemandAdjustmentRepository>,
        zone_adjustments: Arc<dyn BufferAdjustmentRepository>,
        history: Arc<dyn BufferHistoryRepository>,
        adus: Arc<dyn AduRepository>,
        catalog: Arc<dyn CatalogClient>,
        publisher: Publisher,
    ) -> Self {
        Self {
            buffers,
            adjustments,
            zone_adjustments,
            history,
            adus,
            catalog,
            publisher,
        }
    }

    #[instrument(skip(self), fields(%organization_id, %product_id), err)]
    pub async fn calculate(
        &self,
        product_id: ProductId,
        organization_id: OrganizationId,
    ) -> EngineResult<Buffer> {
        let product = self.catalog.get_product(organization_id, product_id).await?;
        let profile_id = product.buffer_profile_id.ok_or_else(|| {
            EngineError::NotFound(format!("buffer profile for product {product_id}"))
        })?;
        let profile = self
            .catalog
            .get_buffer_profile(organization_id, profile_id)
            .await?;
        profile.validate()?;
        let supplier = self.catalog.get_supplier(organization_id, product_id).await?;

        let adu = self
            .adus
            .get_latest(organization_id, product_id)?
            .ok_or_else(|| EngineError::NotFound(format!("ADU calculation for product {product_id}")))?;
        let base_cpd = adu.adu_value.ceil();

        let now = Utc::now();
        let today = now.date_naive();
        let active_fads: Vec<DemandAdjustment> = self
            .adjustments
            .list_by_product(organization_id, product_id)?
            .into_iter()
            .filter(|a| a.is_active_on(today))
            .collect();
        let factor = active_factor(&active_fads, today);
        let cpd = adjusted_daily_usage(base_cpd, factor);
        debug!(adu = adu.adu_value, factor, cpd, ltd = supplier.lead_time_days, "sizing inputs");

        let sizing = ZoneSizing::compute(&SizingInputs {
            adc: cpd,
            ltd: supplier.lead_time_days,
            lead_time_factor: profile.lead_time_factor,
            variability_factor: profile.variability_factor,
            order_cycle_days: profile.order_cycle_days,
            minimum_order_quantity: supplier.minimum_order_quantity,
        })?;

        let existing = self.buffers.get_by_product(organization_id, product_id)?;
        // Zone adjustments target a buffer id, so a new buffer has none yet.
        let active_zone_adjustments: Vec<BufferAdjustment> = match &existing {
            Some(buffer) => self
                .zone_adjustments
                .list_by_buffer(organization_id, buffer.id)?
                .into_iter()
                .filter(|a| a.is_active_on(today))
                .collect(),
            None => Vec::new(),
        };
        let sizing = apply_zone_adjustments(sizing, &active_zone_adjustments, today);
        let has_adjustments = !active_fads.is_empty() || !active_zone_adjustments.is_empty();

        let (buffer, expected, previous) = match existing {
            Some(mut buffer) => {
                let version = buffer.version;
                let old_nfp = buffer.net_flow_position;
                let old_zone =
                    buffer.resize(profile.id, cpd, supplier.lead_time_days, sizing, now);
                if product.location_id.is_some() {
                    buffer.location_id = product.location_id;
                }
                (buffer, ExpectedVersion::Exact(version), Some((old_zone, old_nfp)))
            }
            None => {
                let mut buffer = Buffer::new(
                    product_id,
                    organization_id,
                    profile.id,
                    cpd,
                    supplier.lead_time_days,
                    sizing,
                    now,
                );
                if let Some(location_id) = product.location_id {
                    buffer = buffer.with_location(location_id);
                }
                (buffer, ExpectedVersion::absent(), None)
            }
        };

        let buffer = self.buffers.upsert(&buffer, expected)?;
        info!(
            buffer_id = %buffer.id,
            tor = buffer.top_of_red(),
            toy = buffer.top_of_yellow(),
            tog = buffer.top_of_green(),
            zone = %buffer.zone,
            has_adjustments,
            "buffer calculated"
        );
        self.history.record(&BufferHistory::snapshot(
            &buffer,
            &profile,
            supplier.minimum_order_quantity,
            has_adjustments,
            now,
        ))?;

        let unpublished = || EngineError::unpublished("buffer calculation");
        if previous.is_none() {
            self.publisher
                .publish_event(organization_id, &BufferCreated::from_buffer(&buffer))
                .await
                .map_err(unpublished())?;
        }
        self.publisher
            .publish_event(organization_id, &BufferCalculated::new(&buffer, &profile, adu.adu_value))
            .await
            .map_err(unpublished())?;
        for fad in &active_fads {
            self.publisher
                .publish_event(organization_id, &FadApplied::new(fad, &buffer, base_cpd, now))
                .await
                .map_err(unpublished())?;
        }

        if let Some((old_zone, old_nfp)) = previous {
            if old_zone != buffer.zone {
                let event = BufferZoneChanged {
                    status: BufferStatusChanged::new(&buffer, old_zone, old_nfp, now),
                    transition_reason: RECALCULATION_REASON.to_string(),
                };
                self.publisher
                    .publish_event(organization_id, &event)
                    .await
                    .map_err(unpublished())?;
            }
        }

        Ok(buffer)
    }

    /// Daily sizing snapshots of a buffer, newest first. A zero `limit` means
    /// the default history length.
    pub fn history(
        &self,
        organization_id: OrganizationId,
        id: BufferId,
        limit: usize,
    ) -> EngineResult<Vec<BufferHistory>> {
        self.buffers.get_by_id(organization_id, id)?;
        Ok(self.history.list(organization_id, id, history_limit(limit))?)
    }

    pub fn get(&self, organization_id: OrganizationId, id: BufferId) -> EngineResult<Buffer> {
        Ok(self.buffers.get_by_id(organization_id, id)?)
    }

    pub fn list(&self, organization_id: OrganizationId) -> EngineResult<Vec<Buffer>> {
        Ok(self.buffers.list(organization_id)?)
    }
}
