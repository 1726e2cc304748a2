//! `ddmrp-core` foundation building blocks shared by every DDMRP crate.
//!
//! This crate contains **pure** primitives (no IO, no async runtime).

pub mod error;
pub mod id;
pub mod settings;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentId, AduCalculationId, BufferAdjustmentId, BufferHistoryId, BufferId,
    BufferProfileId, LocationId, OrganizationId, ProductId, SupplierId, UserId,
};
pub use settings::{OrganizationSettings, OrganizationSettingsStore};
pub use version::ExpectedVersion;
