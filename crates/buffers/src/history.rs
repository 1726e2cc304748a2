use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ddmrp_core::{BufferHistoryId, BufferId, OrganizationId, ProductId};

use crate::buffer::Buffer;
use crate::profile::BufferProfile;

/// Daily sizing snapshot of a buffer. One per buffer and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferHistory {
    pub id: BufferHistoryId,
    pub buffer_id: BufferId,
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub snapshot_date: NaiveDate,
    pub cpd: f64,
    pub dlt: u32,
    pub red_zone: f64,
    pub red_base: f64,
    pub red_safe: f64,
    pub yellow_zone: f64,
    pub green_zone: f64,
    pub lead_time_factor: f64,
    pub variability_factor: f64,
    pub moq: f64,
    pub order_frequency: u32,
    /// Whether any demand or zone adjustment shaped this sizing.
    pub has_adjustments: bool,
    pub created_at: DateTime<Utc>,
}

impl BufferHistory {
    pub fn snapshot(
        buffer: &Buffer,
        profile: &BufferProfile,
        moq: f64,
        has_adjustments: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let s = &buffer.sizing;
        Self {
            id: BufferHistoryId::new(),
            buffer_id: buffer.id,
            product_id: buffer.product_id,
            organization_id: buffer.organization_id,
            snapshot_date: now.date_naive(),
            cpd: buffer.cpd,
            dlt: buffer.ltd,
            red_zone: s.red_zone,
            red_base: s.red_base,
            red_safe: s.red_safe,
            yellow_zone: s.yellow_zone,
            green_zone: s.green_zone,
            lead_time_factor: profile.lead_time_factor,
            variability_factor: profile.variability_factor,
            moq,
            order_frequency: profile.order_cycle_days,
            has_adjustments,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::ZoneSizing;
    use ddmrp_core::BufferProfileId;

    #[test]
    fn snapshot_copies_sizing_and_profile() {
        let profile = BufferProfile {
            id: BufferProfileId::new(),
            organization_id: OrganizationId::new(),
            name: "standard".into(),
            lead_time_factor: 0.5,
            variability_factor: 0.5,
            order_cycle_days: 7,
        };
        let now = Utc::now();
        let buffer = Buffer::new(
            ProductId::new(),
            profile.organization_id,
            profile.id,
            10.0,
            10,
            ZoneSizing::from_zones(50.0, 25.0, 100.0, 70.0),
            now,
        );

        let history = BufferHistory::snapshot(&buffer, &profile, 40.0, true, now);
        assert_eq!(history.buffer_id, buffer.id);
        assert_eq!(history.snapshot_date, now.date_naive());
        assert_eq!(history.red_zone, 75.0);
        assert_eq!(history.dlt, 10);
        assert_eq!(history.order_frequency, 7);
        assert_eq!(history.moq, 40.0);
        assert!(history.has_adjustments);
    }
}
