//! DDMRP buffer domain: profiles, ADU, zone sizing, buffer position, demand
//! and zone adjustments, daily history, and the events they produce.
//!
//! Everything here is pure and synchronous; persistence and publishing live
//! in `ddmrp-engine`.

pub mod adjustment;
pub mod adu;
pub mod buffer;
pub mod events;
pub mod history;
pub mod profile;
pub mod zone_adjustment;
pub mod zones;

pub use adjustment::{
    AdjustmentChanges, AdjustmentType, DemandAdjustment, NewDemandAdjustment, active_factor,
    adjusted_daily_usage,
};
pub use adu::{AduCalculation, AduMethod, NewAduCalculation};
pub use buffer::{Buffer, Position, PositionChange};
pub use events::{
    AduCalculated, BufferAlertTriggered, BufferCalculated, BufferCreated, BufferStatusChanged,
    BufferZoneChanged, DdmrpEvent, EventDecodeError, FadApplied, FadCreated, FadDeleted,
    FadUpdated,
};
pub use history::BufferHistory;
pub use profile::BufferProfile;
pub use zone_adjustment::{
    BufferAdjustment, BufferAdjustmentType, NewBufferAdjustment, TargetZone,
    apply_zone_adjustments,
};
pub use zones::{AlertLevel, SizingInputs, Zone, ZoneSizing};
