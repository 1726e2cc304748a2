//! Shared fixture for the use-case tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use ddmrp_buffers::{AduCalculation, AduMethod, Buffer, BufferProfile, ZoneSizing};
use ddmrp_core::{
    AduCalculationId, BufferProfileId, ExpectedVersion, OrganizationId, OrganizationSettingsStore,
    ProductId, SupplierId,
};
use ddmrp_events::{InMemoryTransport, Publisher, PublisherConfig};

use crate::adjustments::DemandAdjustmentRegistry;
use crate::adu::AduCalculator;
use crate::calculator::BufferCalculator;
use crate::memory::{
    InMemoryAduRepository, InMemoryBufferAdjustmentRepository, InMemoryBufferHistoryRepository,
    InMemoryBufferRepository, InMemoryCatalog, InMemoryDemandAdjustmentRepository,
};
use crate::position::NfpUpdater;
use crate::providers::{
    AduRepository, BufferRepository, CatalogClient, CatalogError, Product, ProductSupplier,
};
use crate::scanner::ReplenishmentScanner;
use crate::zone_adjustments::BufferAdjustmentRegistry;

/// Delays every product lookup.
struct SlowCatalog {
    inner: Arc<InMemoryCatalog>,
    delay: Duration,
}

#[async_trait]
impl CatalogClient for SlowCatalog {
    async fn get_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Product, CatalogError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_product(organization_id, product_id).await
    }

    async fn get_buffer_profile(
        &self,
        organization_id: OrganizationId,
        profile_id: BufferProfileId,
    ) -> Result<BufferProfile, CatalogError> {
        self.inner.get_buffer_profile(organization_id, profile_id).await
    }

    async fn get_supplier(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<ProductSupplier, CatalogError> {
        self.inner.get_supplier(organization_id, product_id).await
    }
}

pub(crate) struct Harness {
    pub org: OrganizationId,
    pub transport: Arc<InMemoryTransport>,
    pub buffers: Arc<InMemoryBufferRepository>,
    pub catalog: Arc<InMemoryCatalog>,
    pub adus: Arc<InMemoryAduRepository>,
    pub settings: Arc<OrganizationSettingsStore>,
    pub registry: DemandAdjustmentRegistry,
    pub zone_adjustments: BufferAdjustmentRegistry,
    pub adu: AduCalculator,
    pub calculator: Arc<BufferCalculator>,
    pub updater: NfpUpdater,
    pub scanner: ReplenishmentScanner,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_slow_catalog(delay: Duration) -> Self {
        Self::build(Some(delay))
    }

    fn build(delay: Option<Duration>) -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::new(transport.clone(), PublisherConfig::default());
        let buffers = Arc::new(InMemoryBufferRepository::new());
        let adjustments = Arc::new(InMemoryDemandAdjustmentRepository::new());
        let zone_adjustments = Arc::new(InMemoryBufferAdjustmentRepository::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let adus = Arc::new(InMemoryAduRepository::new());

        let client: Arc<dyn CatalogClient> = match delay {
            Some(delay) => Arc::new(SlowCatalog {
                inner: catalog.clone(),
                delay,
            }),
            None => catalog.clone(),
        };

        Self {
            org: OrganizationId::new(),
            registry: DemandAdjustmentRegistry::new(adjustments.clone(), publisher.clone()),
            zone_adjustments: BufferAdjustmentRegistry::new(zone_adjustments.clone(), buffers.clone()),
            adu: AduCalculator::new(adus.clone(), buffers.clone(), publisher.clone()),
            calculator: Arc::new(BufferCalculator::new(
                buffers.clone(),
                adjustments,
                zone_adjustments,
                Arc::new(InMemoryBufferHistoryRepository::new()),
                adus.clone(),
                client,
                publisher.clone(),
            )),
            updater: NfpUpdater::new(buffers.clone(), publisher),
            scanner: ReplenishmentScanner::new(buffers.clone()),
            settings: Arc::new(OrganizationSettingsStore::new()),
            transport,
            buffers,
            catalog,
            adus,
        }
    }

    /// Store today's ADU for a product, replacing any earlier one today.
    pub fn set_adu(&self, org: OrganizationId, product_id: ProductId, adu: f64) {
        let now = Utc::now();
        self.adus
            .save(&AduCalculation {
                id: AduCalculationId::new(),
                product_id,
                organization_id: org,
                calculation_date: now.date_naive(),
                adu_value: adu,
                method: AduMethod::Average,
                period_days: 30,
                data_point_count: 30,
                created_at: now,
            })
            .unwrap();
    }

    /// Register a product with a 0.5/0.5/7-day profile and a primary supplier.
    pub fn product(&self, adu: f64, lead_time_days: u32, moq: f64) -> ProductId {
        self.product_in(self.org, adu, lead_time_days, moq)
    }

    pub fn product_in(
        &self,
        org: OrganizationId,
        adu: f64,
        lead_time_days: u32,
        moq: f64,
    ) -> ProductId {
        let product_id = self.product_without_adu(org, lead_time_days, moq);
        self.set_adu(org, product_id, adu);
        product_id
    }

    /// Catalog entries only; sizing fails until an ADU is stored.
    pub fn product_without_adu(&self, org: OrganizationId, lead_time_days: u32, moq: f64) -> ProductId {
        let profile = BufferProfile {
            id: BufferProfileId::new(),
            organization_id: org,
            name: "standard".into(),
            lead_time_factor: 0.5,
            variability_factor: 0.5,
            order_cycle_days: 7,
        };
        let product_id = ProductId::new();
        self.catalog.insert_product(Product {
            id: product_id,
            organization_id: org,
            sku: format!("SKU-{product_id}"),
            name: "widget".into(),
            buffer_profile_id: Some(profile.id),
            location_id: None,
        });
        self.catalog.insert_profile(profile);
        self.catalog.insert_supplier(ProductSupplier {
            supplier_id: SupplierId::new(),
            product_id,
            lead_time_days,
            is_primary: true,
            minimum_order_quantity: moq,
        });
        product_id
    }

    pub fn product_without_profile(&self) -> ProductId {
        let product_id = ProductId::new();
        self.catalog.insert_product(Product {
            id: product_id,
            organization_id: self.org,
            sku: "SKU-ORPHAN".into(),
            name: "orphan".into(),
            buffer_profile_id: None,
            location_id: None,
        });
        product_id
    }

    pub fn seed_buffer(&self, product_id: ProductId) -> Buffer {
        self.seed_buffer_in(self.org, product_id)
    }

    pub fn seed_buffer_in(&self, org: OrganizationId, product_id: ProductId) -> Buffer {
        let buffer = Buffer::new(
            product_id,
            org,
            BufferProfileId::new(),
            10.0,
            10,
            ZoneSizing::from_zones(50.0, 25.0, 100.0, 70.0),
            Utc::now(),
        );
        self.buffers
            .upsert(&buffer, ExpectedVersion::absent())
            .unwrap()
    }

    /// A second organization with one buffered product.
    pub fn second_organization(&self) -> OrganizationId {
        let org = OrganizationId::new();
        let product = self.product_in(org, 10.0, 10, 0.0);
        self.seed_buffer_in(org, product);
        org
    }
}
