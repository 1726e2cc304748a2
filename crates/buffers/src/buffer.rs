use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ddmrp_core::{
    BufferId, BufferProfileId, DomainError, DomainResult, LocationId, OrganizationId, ProductId,
};

use crate::zones::{self, AlertLevel, Zone, ZoneSizing};

/// Inventory position pushed by the execution side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub on_hand: f64,
    pub on_order: f64,
    pub qualified_demand: f64,
}

impl Position {
    pub fn new(on_hand: f64, on_order: f64, qualified_demand: f64) -> DomainResult<Self> {
        let position = Self {
            on_hand,
            on_order,
            qualified_demand,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn validate(&self) -> DomainResult<()> {
        for (name, value) in [
            ("on_hand", self.on_hand),
            ("on_order", self.on_order),
            ("qualified_demand", self.qualified_demand),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DomainError::validation(format!("{name} must be non-negative")));
            }
        }
        Ok(())
    }

    pub fn net_flow(&self) -> f64 {
        self.on_hand + self.on_order - self.qualified_demand
    }
}

/// What a position update did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionChange {
    pub old_zone: Zone,
    pub new_zone: Zone,
    pub old_alert_level: AlertLevel,
    pub new_alert_level: AlertLevel,
    pub old_nfp: f64,
    pub new_nfp: f64,
    /// False when the update replayed the stored position exactly.
    pub changed: bool,
    /// True for the first position ever reported for the buffer.
    pub first_position: bool,
}

impl PositionChange {
    pub fn zone_changed(&self) -> bool {
        self.old_zone != self.new_zone
    }

    /// Alert when entering (or worsening inside) red.
    ///
    /// A new buffer starts below red with nothing reported, so its first
    /// position alerts on the zone it lands in.
    pub fn should_alert(&self) -> bool {
        self.new_zone.is_red_or_below()
            && (self.first_position
                || self.zone_changed()
                || self.old_alert_level != self.new_alert_level)
    }
}

/// Buffer snapshot for one (product, organization).
///
/// Writes replace the whole snapshot; `version` guards them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub id: BufferId,
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub buffer_profile_id: BufferProfileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,

    /// Adjusted daily consumption used for the current sizing.
    pub cpd: f64,
    /// Lead time days used for the current sizing.
    pub ltd: u32,
    #[serde(flatten)]
    pub sizing: ZoneSizing,

    pub on_hand: f64,
    pub on_order: f64,
    pub qualified_demand: f64,
    pub net_flow_position: f64,
    pub buffer_penetration: f64,
    pub zone: Zone,
    pub alert_level: AlertLevel,

    pub last_recalculated_at: DateTime<Utc>,
    /// Unset until the execution side reports a position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_recorded_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Buffer {
    /// A freshly sized buffer with an empty position.
    pub fn new(
        product_id: ProductId,
        organization_id: OrganizationId,
        buffer_profile_id: BufferProfileId,
        cpd: f64,
        ltd: u32,
        sizing: ZoneSizing,
        now: DateTime<Utc>,
    ) -> Self {
        let mut buffer = Self {
            id: BufferId::new(),
            product_id,
            organization_id,
            buffer_profile_id,
            location_id: None,
            cpd,
            ltd,
            sizing,
            on_hand: 0.0,
            on_order: 0.0,
            qualified_demand: 0.0,
            net_flow_position: 0.0,
            buffer_penetration: 0.0,
            zone: Zone::BelowRed,
            alert_level: AlertLevel::Critical,
            last_recalculated_at: now,
            position_recorded_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        buffer.derive();
        buffer
    }

    pub fn with_location(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn position(&self) -> Position {
        Position {
            on_hand: self.on_hand,
            on_order: self.on_order,
            qualified_demand: self.qualified_demand,
        }
    }

    pub fn top_of_red(&self) -> f64 {
        self.sizing.top_of_red
    }

    pub fn top_of_yellow(&self) -> f64 {
        self.sizing.top_of_yellow
    }

    pub fn top_of_green(&self) -> f64 {
        self.sizing.top_of_green
    }

    /// Quantity that brings the position back to top of green.
    pub fn replenishment_qty(&self) -> f64 {
        (self.sizing.top_of_green - self.net_flow_position).max(0.0)
    }

    pub fn needs_replenishment(&self) -> bool {
        self.zone.is_red_or_below() || self.alert_level.requires_action()
    }

    /// Re-derive NFP, zone, alert level, and penetration from the stored fields.
    fn derive(&mut self) {
        self.net_flow_position = self.position().net_flow();
        self.zone = self.sizing.zone_for(self.net_flow_position);
        self.alert_level =
            zones::alert_level_for(self.zone, self.net_flow_position, self.sizing.top_of_red);
        self.buffer_penetration =
            zones::penetration(self.net_flow_position, self.sizing.top_of_green);
    }

    /// Apply a new inventory position.
    ///
    /// Replaying the stored position leaves the buffer untouched.
    pub fn apply_position(&mut self, position: Position, now: DateTime<Utc>) -> DomainResult<PositionChange> {
        position.validate()?;

        let old_zone = self.zone;
        let old_alert_level = self.alert_level;
        let old_nfp = self.net_flow_position;
        let first_position = self.position_recorded_at.is_none();
        let changed = first_position || self.position() != position;

        if changed {
            self.on_hand = position.on_hand;
            self.on_order = position.on_order;
            self.qualified_demand = position.qualified_demand;
            self.derive();
            self.position_recorded_at = Some(now);
            self.updated_at = now;
        }

        Ok(PositionChange {
            old_zone,
            new_zone: self.zone,
            old_alert_level,
            new_alert_level: self.alert_level,
            old_nfp,
            new_nfp: self.net_flow_position,
            changed,
            first_position,
        })
    }

    /// Replace the sizing, keeping the position. Returns the zone before resizing.
    pub fn resize(
        &mut self,
        buffer_profile_id: BufferProfileId,
        cpd: f64,
        ltd: u32,
        sizing: ZoneSizing,
        now: DateTime<Utc>,
    ) -> Zone {
        let old_zone = self.zone;
        self.buffer_profile_id = buffer_profile_id;
        self.cpd = cpd;
        self.ltd = ltd;
        self.sizing = sizing;
        self.derive();
        self.last_recalculated_at = now;
        self.updated_at = now;
        old_zone
    }
}
