//! Demand adjustment use cases.
//!
//! Every mutation is validated, persisted, then published. A publish failure
//! after the write is reported as [`EngineError::Unpublished`]: the record
//! exists, the notification may not.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

use ddmrp_buffers::{
    AdjustmentChanges, DemandAdjustment, FadCreated, FadDeleted, FadUpdated, NewDemandAdjustment,
    active_factor,
};
use ddmrp_core::{AdjustmentId, OrganizationId, ProductId};
use ddmrp_events::Publisher;

use crate::error::{EngineError, EngineResult};
use crate::providers::DemandAdjustmentRepository;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Limit/offset pagination. The limit is clamped to `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, 0)
    }
}

/// Product of the factors active for `product_id` on `date`.
pub fn active_factor_for(
    repo: &dyn DemandAdjustmentRepository,
    organization_id: OrganizationId,
    product_id: ProductId,
    date: NaiveDate,
) -> EngineResult<f64> {
    let adjustments = repo.list_by_product(organization_id, product_id)?;
    Ok(active_factor(&adjustments, date))
}

pub struct DemandAdjustmentRegistry {
    repo: Arc<dyn DemandAdjustmentRepository>,
    publisher: Publisher,
}

impl DemandAdjustmentRegistry {
    pub fn new(repo: Arc<dyn DemandAdjustmentRepository>, publisher: Publisher) -> Self {
        Self { repo, publisher }
    }

    #[instrument(
        skip(self, input),
        fields(organization_id = %input.organization_id, product_id = %input.product_id),
        err
    )]
    pub async fn create(&self, input: NewDemandAdjustment) -> EngineResult<DemandAdjustment> {
        let adjustment = input.into_adjustment(Utc::now())?;
        self.repo.create(&adjustment)?;
        info!(adjustment_id = %adjustment.id, factor = adjustment.factor, "demand adjustment created");

        self.publisher
            .publish_event(adjustment.organization_id, &FadCreated::from_adjustment(&adjustment))
            .await
            .map_err(EngineError::unpublished("demand adjustment create"))?;
        Ok(adjustment)
    }

    #[instrument(skip(self, changes), fields(%organization_id, %id), err)]
    pub async fn update(
        &self,
        organization_id: OrganizationId,
        id: AdjustmentId,
        changes: AdjustmentChanges,
    ) -> EngineResult<DemandAdjustment> {
        let mut adjustment = self.repo.get_by_id(organization_id, id)?;
        adjustment.apply(changes, Utc::now())?;
        self.repo.update(&adjustment)?;
        info!(factor = adjustment.factor, "demand adjustment updated");

        self.publisher
            .publish_event(organization_id, &FadUpdated::from_adjustment(&adjustment))
            .await
            .map_err(EngineError::unpublished("demand adjustment update"))?;
        Ok(adjustment)
    }

    #[instrument(skip(self), fields(%organization_id, %id), err)]
    pub async fn delete(&self, organization_id: OrganizationId, id: AdjustmentId) -> EngineResult<()> {
        let adjustment = self.repo.get_by_id(organization_id, id)?;
        self.repo.delete(organization_id, id)?;
        info!("demand adjustment deleted");

        self.publisher
            .publish_event(organization_id, &FadDeleted::new(&adjustment, Utc::now()))
            .await
            .map_err(EngineError::unpublished("demand adjustment delete"))?;
        Ok(())
    }

    pub fn get(&self, organization_id: OrganizationId, id: AdjustmentId) -> EngineResult<DemandAdjustment> {
        Ok(self.repo.get_by_id(organization_id, id)?)
    }

    pub fn list_by_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> EngineResult<Vec<DemandAdjustment>> {
        Ok(self.repo.list_by_product(organization_id, product_id)?)
    }

    pub fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        page: Page,
    ) -> EngineResult<Vec<DemandAdjustment>> {
        let page = Page::new(page.limit, page.offset);
        Ok(self
            .repo
            .list_by_organization(organization_id, page.limit, page.offset)?)
    }

    pub fn active_factor_for(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        date: NaiveDate,
    ) -> EngineResult<f64> {
        active_factor_for(self.repo.as_ref(), organization_id, product_id, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDemandAdjustmentRepository;
    use ddmrp_buffers::AdjustmentType;
    use ddmrp_core::UserId;
    use ddmrp_events::{InMemoryTransport, PublishError, PublisherConfig, RetryPolicy, subject};

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        repo: Arc<InMemoryDemandAdjustmentRepository>,
        registry: DemandAdjustmentRegistry,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(InMemoryTransport::new());
        let repo = Arc::new(InMemoryDemandAdjustmentRepository::new());
        let publisher = Publisher::new(
            transport.clone(),
            PublisherConfig::default().with_retry(RetryPolicy::no_retry()),
        );
        let registry = DemandAdjustmentRegistry::new(repo.clone(), publisher);
        Fixture {
            transport,
            repo,
            registry,
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn input(org: OrganizationId, product: ProductId) -> NewDemandAdjustment {
        NewDemandAdjustment {
            product_id: product,
            organization_id: org,
            adjustment_type: AdjustmentType::Fad,
            start_date: date(3, 1),
            end_date: date(3, 31),
            factor: 1.2,
            reason: "trade show".into(),
            created_by: UserId::new(),
        }
    }

    #[tokio::test]
    async fn create_persists_and_publishes() {
        let f = fixture();
        let org = OrganizationId::new();
        let created = f.registry.create(input(org, ProductId::new())).await.unwrap();

        assert_eq!(f.registry.get(org, created.id).unwrap(), created);
        let published = f.transport.envelopes(subject::FAD_CREATED);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "fad.created");
        let payload: FadCreated = published[0].decode_payload().unwrap();
        assert_eq!(payload.fad_id, created.id);
    }

    #[tokio::test]
    async fn invalid_create_writes_and_publishes_nothing() {
        let f = fixture();
        let org = OrganizationId::new();
        let mut bad = input(org, ProductId::new());
        bad.end_date = date(2, 1);

        let err = f.registry.create(bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref m) if m == "end_date must be >= start_date"));
        assert!(f.registry.list_by_organization(org, Page::default()).unwrap().is_empty());
        assert!(f.transport.is_empty());
    }

    #[tokio::test]
    async fn publish_failure_after_write_is_surfaced() {
        let f = fixture();
        f.transport.fail_next_appends(1);
        let org = OrganizationId::new();

        let err = f.registry.create(input(org, ProductId::new())).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Unpublished {
                source: PublishError::Exhausted { .. },
                ..
            }
        ));
        // the record exists anyway
        assert_eq!(f.registry.list_by_organization(org, Page::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_fields_and_publishes_snapshot() {
        let f = fixture();
        let org = OrganizationId::new();
        let created = f.registry.create(input(org, ProductId::new())).await.unwrap();

        let updated = f
            .registry
            .update(
                org,
                created.id,
                AdjustmentChanges {
                    adjustment_type: AdjustmentType::Promotion,
                    start_date: date(4, 1),
                    end_date: date(4, 15),
                    factor: 2.0,
                    reason: "spring promotion".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.factor, 2.0);
        assert_eq!(updated.created_by, created.created_by);
        let payload: FadUpdated = f.transport.envelopes(subject::FAD_UPDATED)[0]
            .decode_payload()
            .unwrap();
        assert_eq!(payload.adjustment_type, AdjustmentType::Promotion);
        assert_eq!(payload.end_date, date(4, 15));
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_record_are_not_found() {
        let f = fixture();
        let org = OrganizationId::new();
        let missing = AdjustmentId::new();

        let changes = AdjustmentChanges {
            adjustment_type: AdjustmentType::Fad,
            start_date: date(1, 1),
            end_date: date(1, 2),
            factor: 1.0,
            reason: "x".into(),
        };
        assert!(matches!(
            f.registry.update(org, missing, changes).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(f.registry.delete(org, missing).await, Err(EngineError::NotFound(_))));
        assert!(f.transport.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_and_publishes() {
        let f = fixture();
        let org = OrganizationId::new();
        let created = f.registry.create(input(org, ProductId::new())).await.unwrap();

        f.registry.delete(org, created.id).await.unwrap();
        assert!(matches!(f.registry.get(org, created.id), Err(EngineError::NotFound(_))));
        assert_eq!(f.transport.envelopes(subject::FAD_DELETED).len(), 1);
    }

    #[tokio::test]
    async fn active_factor_compounds_overlapping_windows() {
        let f = fixture();
        let org = OrganizationId::new();
        let product = ProductId::new();
        f.registry.create(input(org, product)).await.unwrap();
        let mut second = input(org, product);
        second.factor = 0.5;
        second.start_date = date(3, 20);
        second.end_date = date(4, 10);
        f.registry.create(second).await.unwrap();

        let factor = |d| f.registry.active_factor_for(org, product, d).unwrap();
        assert_eq!(factor(date(3, 10)), 1.2);
        assert!((factor(date(3, 25)) - 0.6).abs() < 1e-12);
        assert_eq!(factor(date(4, 5)), 0.5);
        assert_eq!(factor(date(5, 1)), 1.0);

        // another organization never sees these
        assert_eq!(
            f.registry.active_factor_for(OrganizationId::new(), product, date(3, 25)).unwrap(),
            1.0
        );
    }

    #[tokio::test]
    async fn pagination_clamps_the_limit() {
        let f = fixture();
        let org = OrganizationId::new();
        for _ in 0..3 {
            f.registry.create(input(org, ProductId::new())).await.unwrap();
        }

        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(10_000, 0).limit, MAX_PAGE_SIZE);
        assert_eq!(f.registry.list_by_organization(org, Page::new(2, 0)).unwrap().len(), 2);
        assert_eq!(f.registry.list_by_organization(org, Page::new(2, 2)).unwrap().len(), 1);
        assert_eq!(f.registry.list_by_organization(org, Page { limit: 0, offset: 0 }).unwrap().len(), 1);
        assert_eq!(f.repo.list_by_organization(org, 50, 0).unwrap().len(), 3);
    }
}
