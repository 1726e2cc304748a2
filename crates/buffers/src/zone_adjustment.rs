//! Zone-level buffer adjustments: time-windowed factors applied to the sized
//! zones of one buffer, on top of any demand adjustment.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ddmrp_core::{
    BufferAdjustmentId, BufferId, DomainError, DomainResult, OrganizationId, ProductId, UserId,
};

use crate::zones::ZoneSizing;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferAdjustmentType {
    ZoneFactor,
    PlannedEvent,
    SpikeManagement,
    SeasonalPrepare,
}

impl BufferAdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferAdjustmentType::ZoneFactor => "zone_factor",
            BufferAdjustmentType::PlannedEvent => "planned_event",
            BufferAdjustmentType::SpikeManagement => "spike_management",
            BufferAdjustmentType::SeasonalPrepare => "seasonal_prepare",
        }
    }
}

impl core::fmt::Display for BufferAdjustmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which zone a factor scales.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetZone {
    Red,
    Yellow,
    Green,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBufferAdjustment {
    pub buffer_id: BufferId,
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub adjustment_type: BufferAdjustmentType,
    pub target_zone: TargetZone,
    pub factor: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub created_by: UserId,
}

impl NewBufferAdjustment {
    pub fn validate(&self) -> DomainResult<()> {
        if self.buffer_id.is_nil() {
            return Err(DomainError::validation("buffer_id is required"));
        }
        if self.product_id.is_nil() {
            return Err(DomainError::validation("product_id is required"));
        }
        if self.organization_id.is_nil() {
            return Err(DomainError::validation("organization_id is required"));
        }
        if self.created_by.is_nil() {
            return Err(DomainError::validation("created_by is required"));
        }
        // A zero factor would collapse the zone.
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(DomainError::validation("factor must be greater than 0"));
        }
        if self.end_date < self.start_date {
            return Err(DomainError::validation("end_date must be >= start_date"));
        }
        if self.reason.trim().is_empty() {
            return Err(DomainError::validation("reason is required"));
        }
        Ok(())
    }

    pub fn into_adjustment(self, now: DateTime<Utc>) -> DomainResult<BufferAdjustment> {
        self.validate()?;
        Ok(BufferAdjustment {
            id: BufferAdjustmentId::new(),
            buffer_id: self.buffer_id,
            product_id: self.product_id,
            organization_id: self.organization_id,
            adjustment_type: self.adjustment_type,
            target_zone: self.target_zone,
            factor: self.factor,
            start_date: self.start_date,
            end_date: self.end_date,
            reason: self.reason,
            created_by: self.created_by,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferAdjustment {
    pub id: BufferAdjustmentId,
    pub buffer_id: BufferId,
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub adjustment_type: BufferAdjustmentType,
    pub target_zone: TargetZone,
    pub factor: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl BufferAdjustment {
    /// Inclusive on both ends.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Scale `sizing` by every adjustment active on `date`.
///
/// Red factors scale base and safety alike so the red zone stays their sum.
/// Thresholds are re-stacked afterwards.
pub fn apply_zone_adjustments<'a>(
    sizing: ZoneSizing,
    adjustments: impl IntoIterator<Item = &'a BufferAdjustment>,
    date: NaiveDate,
) -> ZoneSizing {
    let (mut red, mut yellow, mut green) = (1.0, 1.0, 1.0);
    for adj in adjustments.into_iter().filter(|a| a.is_active_on(date)) {
        match adj.target_zone {
            TargetZone::Red => red *= adj.factor,
            TargetZone::Yellow => yellow *= adj.factor,
            TargetZone::Green => green *= adj.factor,
            TargetZone::All => {
                red *= adj.factor;
                yellow *= adj.factor;
                green *= adj.factor;
            }
        }
    }
    ZoneSizing::from_zones(
        sizing.red_base * red,
        sizing.red_safe * red,
        sizing.yellow_zone * yellow,
        sizing.green_zone * green,
    )
}
