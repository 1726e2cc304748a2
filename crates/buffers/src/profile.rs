use serde::{Deserialize, Serialize};

use ddmrp_core::{BufferProfileId, DomainError, DomainResult, OrganizationId};

/// Sizing template shared by many buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferProfile {
    pub id: BufferProfileId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Scales the red base (typically 0.2–0.8, shorter lead times use higher factors).
    pub lead_time_factor: f64,
    /// Share of the red base added as red safety.
    pub variability_factor: f64,
    /// Desired days between orders; drives the green zone.
    pub order_cycle_days: u32,
}

impl BufferProfile {
    pub fn validate(&self) -> DomainResult<()> {
        if !self.lead_time_factor.is_finite() || self.lead_time_factor < 0.0 {
            return Err(DomainError::validation("lead_time_factor must be non-negative"));
        }
        if !self.variability_factor.is_finite() || self.variability_factor < 0.0 {
            return Err(DomainError::validation("variability_factor must be non-negative"));
        }
        Ok(())
    }
}
