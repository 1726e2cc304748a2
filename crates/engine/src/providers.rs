//! Collaborators the engine consumes: repositories and the catalog.
//!
//! Repositories are synchronous and tenant-scoped. The catalog is a remote
//! service and therefore async.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ddmrp_buffers::{
    AduCalculation, Buffer, BufferAdjustment, BufferHistory, BufferProfile, DemandAdjustment,
};
use ddmrp_core::{
    AdjustmentId, BufferAdjustmentId, BufferId, BufferProfileId, ExpectedVersion, LocationId,
    OrganizationId, ProductId, SupplierId,
};

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Internal(String),
}

pub trait BufferRepository: Send + Sync {
    fn get_by_id(&self, organization_id: OrganizationId, id: BufferId) -> Result<Buffer, RepositoryError>;

    fn get_by_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<Buffer>, RepositoryError>;

    fn list(&self, organization_id: OrganizationId) -> Result<Vec<Buffer>, RepositoryError>;

    /// Replace the whole snapshot if the stored version matches `expected`.
    ///
    /// Returns the stored buffer with its version bumped.
    fn upsert(&self, buffer: &Buffer, expected: ExpectedVersion) -> Result<Buffer, RepositoryError>;
}

pub trait DemandAdjustmentRepository: Send + Sync {
    fn create(&self, adjustment: &DemandAdjustment) -> Result<(), RepositoryError>;
    fn update(&self, adjustment: &DemandAdjustment) -> Result<(), RepositoryError>;
    fn get_by_id(
        &self,
        organization_id: OrganizationId,
        id: AdjustmentId,
    ) -> Result<DemandAdjustment, RepositoryError>;
    fn delete(&self, organization_id: OrganizationId, id: AdjustmentId) -> Result<(), RepositoryError>;
    fn list_by_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Vec<DemandAdjustment>, RepositoryError>;
    /// Ordered by start date, then id.
    fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DemandAdjustment>, RepositoryError>;
}

/// Stored ADU calculations. Buffer sizing reads the latest one.
pub trait AduRepository: Send + Sync {
    /// Store `calculation`, replacing any for the same product and day.
    fn save(&self, calculation: &AduCalculation) -> Result<(), RepositoryError>;

    /// `None` when the product has never been calculated.
    fn get_latest(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<AduCalculation>, RepositoryError>;

    /// Newest first.
    fn list_history(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<AduCalculation>, RepositoryError>;
}

pub trait BufferHistoryRepository: Send + Sync {
    /// Store a snapshot, replacing the buffer's snapshot for the same day.
    fn record(&self, snapshot: &BufferHistory) -> Result<(), RepositoryError>;

    /// Newest first.
    fn list(
        &self,
        organization_id: OrganizationId,
        buffer_id: BufferId,
        limit: usize,
    ) -> Result<Vec<BufferHistory>, RepositoryError>;
}

pub trait BufferAdjustmentRepository: Send + Sync {
    fn create(&self, adjustment: &BufferAdjustment) -> Result<(), RepositoryError>;
    fn get_by_id(
        &self,
        organization_id: OrganizationId,
        id: BufferAdjustmentId,
    ) -> Result<BufferAdjustment, RepositoryError>;
    fn delete(
        &self,
        organization_id: OrganizationId,
        id: BufferAdjustmentId,
    ) -> Result<(), RepositoryError>;
    /// Ordered by start date, then id.
    fn list_by_buffer(
        &self,
        organization_id: OrganizationId,
        buffer_id: BufferId,
    ) -> Result<Vec<BufferAdjustment>, RepositoryError>;
}

impl<T: BufferRepository + ?Sized> BufferRepository for Arc<T> {
    fn get_by_id(&self, organization_id: OrganizationId, id: BufferId) -> Result<Buffer, RepositoryError> {
        (**self).get_by_id(organization_id, id)
    }

    fn get_by_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<Buffer>, RepositoryError> {
        (**self).get_by_product(organization_id, product_id)
    }

    fn list(&self, organization_id: OrganizationId) -> Result<Vec<Buffer>, RepositoryError> {
        (**self).list(organization_id)
    }

    fn upsert(&self, buffer: &Buffer, expected: ExpectedVersion) -> Result<Buffer, RepositoryError> {
        (**self).upsert(buffer, expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub organization_id: OrganizationId,
    pub sku: String,
    pub name: String,
    pub buffer_profile_id: Option<BufferProfileId>,
    /// Stocking location the buffer is held at, when the catalog tracks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSupplier {
    pub supplier_id: SupplierId,
    pub product_id: ProductId,
    pub lead_time_days: u32,
    pub is_primary: bool,
    pub minimum_order_quantity: f64,
}

/// Product catalog owned by another service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Product, CatalogError>;

    async fn get_buffer_profile(
        &self,
        organization_id: OrganizationId,
        profile_id: BufferProfileId,
    ) -> Result<BufferProfile, CatalogError>;

    /// The product's primary supplier.
    async fn get_supplier(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<ProductSupplier, CatalogError>;
}
