//! In-memory providers for tests/dev.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;

use ddmrp_buffers::{
    AduCalculation, Buffer, BufferAdjustment, BufferHistory, BufferProfile, DemandAdjustment,
};
use ddmrp_core::{
    AdjustmentId, BufferAdjustmentId, BufferId, BufferProfileId, ExpectedVersion, OrganizationId,
    ProductId,
};

use crate::providers::{
    AduRepository, BufferAdjustmentRepository, BufferHistoryRepository, BufferRepository,
    CatalogClient, CatalogError, DemandAdjustmentRepository, Product, ProductSupplier,
    RepositoryError,
};

fn poisoned() -> RepositoryError {
    RepositoryError::Internal("lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryBufferRepository {
    inner: RwLock<HashMap<BufferId, Buffer>>,
}

impl InMemoryBufferRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferRepository for InMemoryBufferRepository {
    fn get_by_id(&self, organization_id: OrganizationId, id: BufferId) -> Result<Buffer, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        map.get(&id)
            .filter(|b| b.organization_id == organization_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("buffer {id}")))
    }

    fn get_by_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<Buffer>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .values()
            .find(|b| b.organization_id == organization_id && b.product_id == product_id)
            .cloned())
    }

    fn list(&self, organization_id: OrganizationId) -> Result<Vec<Buffer>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<Buffer> = map
            .values()
            .filter(|b| b.organization_id == organization_id)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.id);
        Ok(out)
    }

    fn upsert(&self, buffer: &Buffer, expected: ExpectedVersion) -> Result<Buffer, RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;

        let current = match map.get(&buffer.id) {
            Some(stored) => stored.version,
            None => {
                let duplicate = map.values().any(|b| {
                    b.organization_id == buffer.organization_id && b.product_id == buffer.product_id
                });
                if duplicate {
                    return Err(RepositoryError::Conflict(format!(
                        "buffer for product {} already exists",
                        buffer.product_id
                    )));
                }
                0
            }
        };

        expected
            .check(current)
            .map_err(|e| RepositoryError::Conflict(e.message().to_string()))?;

        let mut stored = buffer.clone();
        stored.version = current + 1;
        map.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDemandAdjustmentRepository {
    inner: RwLock<HashMap<AdjustmentId, DemandAdjustment>>,
}

impl InMemoryDemandAdjustmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DemandAdjustmentRepository for InMemoryDemandAdjustmentRepository {
    fn create(&self, adjustment: &DemandAdjustment) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if map.contains_key(&adjustment.id) {
            return Err(RepositoryError::Conflict(format!(
                "demand adjustment {} already exists",
                adjustment.id
            )));
        }
        map.insert(adjustment.id, adjustment.clone());
        Ok(())
    }

    fn update(&self, adjustment: &DemandAdjustment) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        match map.get_mut(&adjustment.id) {
            Some(stored) if stored.organization_id == adjustment.organization_id => {
                *stored = adjustment.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound(format!("demand adjustment {}", adjustment.id))),
        }
    }

    fn get_by_id(
        &self,
        organization_id: OrganizationId,
        id: AdjustmentId,
    ) -> Result<DemandAdjustment, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        map.get(&id)
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("demand adjustment {id}")))
    }

    fn delete(&self, organization_id: OrganizationId, id: AdjustmentId) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let owned = map
            .get(&id)
            .is_some_and(|a| a.organization_id == organization_id);
        if !owned {
            return Err(RepositoryError::NotFound(format!("demand adjustment {id}")));
        }
        map.remove(&id);
        Ok(())
    }

    fn list_by_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Vec<DemandAdjustment>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = map
            .values()
            .filter(|a| a.organization_id == organization_id && a.product_id == product_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.start_date, a.id));
        Ok(out)
    }

    fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DemandAdjustment>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = map
            .values()
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.start_date, a.id));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }
}

/// Catalog backed by maps; fill it with the `insert_*` methods.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<(OrganizationId, ProductId), Product>>,
    profiles: RwLock<HashMap<(OrganizationId, BufferProfileId), BufferProfile>>,
    suppliers: RwLock<HashMap<ProductId, Vec<ProductSupplier>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((product.organization_id, product.id), product);
    }

    pub fn insert_profile(&self, profile: BufferProfile) {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((profile.organization_id, profile.id), profile);
    }

    pub fn insert_supplier(&self, supplier: ProductSupplier) {
        self.suppliers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(supplier.product_id)
            .or_default()
            .push(supplier);
    }
}

fn unavailable() -> CatalogError {
    CatalogError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn get_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Product, CatalogError> {
        let map = self.products.read().map_err(|_| unavailable())?;
        map.get(&(organization_id, product_id))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("product {product_id}")))
    }

    async fn get_buffer_profile(
        &self,
        organization_id: OrganizationId,
        profile_id: BufferProfileId,
    ) -> Result<BufferProfile, CatalogError> {
        let map = self.profiles.read().map_err(|_| unavailable())?;
        map.get(&(organization_id, profile_id))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("buffer profile {profile_id}")))
    }

    async fn get_supplier(
        &self,
        _organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<ProductSupplier, CatalogError> {
        let map = self.suppliers.read().map_err(|_| unavailable())?;
        map.get(&product_id)
            .and_then(|list| list.iter().find(|s| s.is_primary))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("primary supplier for product {product_id}")))
    }
}

/// ADU calculations keyed by (organization, product, day).
#[derive(Debug, Default)]
pub struct InMemoryAduRepository {
    inner: RwLock<HashMap<(OrganizationId, ProductId, NaiveDate), AduCalculation>>,
}

impl InMemoryAduRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Vec<AduCalculation>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = map
            .values()
            .filter(|c| c.organization_id == organization_id && c.product_id == product_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.calculation_date.cmp(&a.calculation_date));
        Ok(out)
    }
}

impl AduRepository for InMemoryAduRepository {
    fn save(&self, calculation: &AduCalculation) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(
            (
                calculation.organization_id,
                calculation.product_id,
                calculation.calculation_date,
            ),
            calculation.clone(),
        );
        Ok(())
    }

    fn get_latest(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<AduCalculation>, RepositoryError> {
        Ok(self.newest_first(organization_id, product_id)?.into_iter().next())
    }

    fn list_history(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        limit: usize,
    ) -> Result<Vec<AduCalculation>, RepositoryError> {
        let mut out = self.newest_first(organization_id, product_id)?;
        out.truncate(limit);
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBufferHistoryRepository {
    inner: RwLock<HashMap<(BufferId, NaiveDate), BufferHistory>>,
}

impl InMemoryBufferHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferHistoryRepository for InMemoryBufferHistoryRepository {
    fn record(&self, snapshot: &BufferHistory) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert((snapshot.buffer_id, snapshot.snapshot_date), snapshot.clone());
        Ok(())
    }

    fn list(
        &self,
        organization_id: OrganizationId,
        buffer_id: BufferId,
        limit: usize,
    ) -> Result<Vec<BufferHistory>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = map
            .values()
            .filter(|h| h.organization_id == organization_id && h.buffer_id == buffer_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.snapshot_date.cmp(&a.snapshot_date));
        out.truncate(limit);
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBufferAdjustmentRepository {
    inner: RwLock<HashMap<BufferAdjustmentId, BufferAdjustment>>,
}

impl InMemoryBufferAdjustmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferAdjustmentRepository for InMemoryBufferAdjustmentRepository {
    fn create(&self, adjustment: &BufferAdjustment) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if map.contains_key(&adjustment.id) {
            return Err(RepositoryError::Conflict(format!(
                "buffer adjustment {} already exists",
                adjustment.id
            )));
        }
        map.insert(adjustment.id, adjustment.clone());
        Ok(())
    }

    fn get_by_id(
        &self,
        organization_id: OrganizationId,
        id: BufferAdjustmentId,
    ) -> Result<BufferAdjustment, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        map.get(&id)
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("buffer adjustment {id}")))
    }

    fn delete(
        &self,
        organization_id: OrganizationId,
        id: BufferAdjustmentId,
    ) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let owned = map
            .get(&id)
            .is_some_and(|a| a.organization_id == organization_id);
        if !owned {
            return Err(RepositoryError::NotFound(format!("buffer adjustment {id}")));
        }
        map.remove(&id);
        Ok(())
    }

    fn list_by_buffer(
        &self,
        organization_id: OrganizationId,
        buffer_id: BufferId,
    ) -> Result<Vec<BufferAdjustment>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = map
            .values()
            .filter(|a| a.organization_id == organization_id && a.buffer_id == buffer_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.start_date, a.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ddmrp_buffers::ZoneSizing;

    fn buffer(org: OrganizationId) -> Buffer {
        Buffer::new(
            ProductId::new(),
            org,
            BufferProfileId::new(),
            10.0,
            5,
            ZoneSizing::from_zones(10.0, 0.0, 10.0, 10.0),
            Utc::now(),
        )
    }

    #[test]
    fn upsert_enforces_expected_version() {
        let repo = InMemoryBufferRepository::new();
        let org = OrganizationId::new();
        let b = buffer(org);

        let stored = repo.upsert(&b, ExpectedVersion::absent()).unwrap();
        assert_eq!(stored.version, 1);

        let stale = repo.upsert(&b, ExpectedVersion::absent());
        assert!(matches!(stale, Err(RepositoryError::Conflict(_))));

        let again = repo.upsert(&stored, ExpectedVersion::Exact(1)).unwrap();
        assert_eq!(again.version, 2);
    }

    #[test]
    fn one_buffer_per_product() {
        let repo = InMemoryBufferRepository::new();
        let org = OrganizationId::new();
        let first = buffer(org);
        repo.upsert(&first, ExpectedVersion::absent()).unwrap();

        let mut second = buffer(org);
        second.product_id = first.product_id;
        assert!(matches!(
            repo.upsert(&second, ExpectedVersion::Any),
            Err(RepositoryError::Conflict(_))
        ));
    }

    fn adu_on(org: OrganizationId, product: ProductId, day: NaiveDate, value: f64) -> AduCalculation {
        AduCalculation {
            id: ddmrp_core::AduCalculationId::new(),
            product_id: product,
            organization_id: org,
            calculation_date: day,
            adu_value: value,
            method: ddmrp_buffers::AduMethod::Average,
            period_days: 30,
            data_point_count: 30,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn adu_is_one_per_day_and_latest_wins() {
        let repo = InMemoryAduRepository::new();
        let org = OrganizationId::new();
        let product = ProductId::new();
        let monday = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();

        repo.save(&adu_on(org, product, tuesday, 12.0)).unwrap();
        repo.save(&adu_on(org, product, monday, 10.0)).unwrap();
        repo.save(&adu_on(org, product, tuesday, 14.0)).unwrap();

        assert_eq!(repo.get_latest(org, product).unwrap().unwrap().adu_value, 14.0);
        let history = repo.list_history(org, product, 30).unwrap();
        assert_eq!(
            history.iter().map(|c| c.adu_value).collect::<Vec<_>>(),
            vec![14.0, 10.0]
        );
        assert_eq!(repo.list_history(org, product, 1).unwrap().len(), 1);
        assert!(repo.get_latest(OrganizationId::new(), product).unwrap().is_none());
    }

    #[test]
    fn reads_are_tenant_isolated() {
        let repo = InMemoryBufferRepository::new();
        let org = OrganizationId::new();
        let stored = repo.upsert(&buffer(org), ExpectedVersion::absent()).unwrap();

        let other = OrganizationId::new();
        assert!(repo.get_by_id(other, stored.id).is_err());
        assert!(repo.list(other).unwrap().is_empty());
        assert_eq!(repo.get_by_id(org, stored.id).unwrap(), stored);
    }
}
