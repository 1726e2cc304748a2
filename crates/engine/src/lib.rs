//! DDMRP use cases: ADU calculation, sizing, position updates, demand and
//! zone adjustments, the replenishment scan, and the daily recalculation.
//!
//! Persistence and the catalog are reached through the traits in
//! [`providers`]; [`memory`] has in-memory versions for tests/dev.

pub mod adjustments;
pub mod adu;
pub mod calculator;
pub mod error;
pub mod memory;
pub mod position;
pub mod providers;
pub mod scanner;
pub mod scheduler;
pub mod zone_adjustments;

#[cfg(test)]
pub(crate) mod testing;

pub use adjustments::{DemandAdjustmentRegistry, Page};
pub use adu::AduCalculator;
pub use calculator::BufferCalculator;
pub use error::{EngineError, EngineResult};
pub use memory::{
    InMemoryAduRepository, InMemoryBufferAdjustmentRepository, InMemoryBufferHistoryRepository,
    InMemoryBufferRepository, InMemoryCatalog, InMemoryDemandAdjustmentRepository,
};
pub use position::NfpUpdater;
pub use providers::{
    AduRepository, BufferAdjustmentRepository, BufferHistoryRepository, BufferRepository,
    CatalogClient, CatalogError, DemandAdjustmentRepository, Product, ProductSupplier,
    RepositoryError,
};
pub use scanner::ReplenishmentScanner;
pub use scheduler::{
    OrganizationReport, RecalculationReport, RecalculationScheduler, RunOutcome, SchedulerConfig,
};
pub use zone_adjustments::BufferAdjustmentRegistry;
