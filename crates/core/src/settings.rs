//! Per-organization operational settings.
//!
//! One store instance is built at startup and injected (behind an `Arc`) into
//! every component that needs organization-scoped switches. There is no
//! process-wide singleton; writes go through [`OrganizationSettingsStore::upsert`]
//! and [`OrganizationSettingsStore::remove`] only.
//!
//! Every write replaces a whole entry, so a lock poisoned by a panicking
//! holder still guards a consistent map and is recovered rather than
//! dropping the operation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use crate::id::OrganizationId;

/// Switches that operators toggle per organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizationSettings {
    /// Let the replenishment coordinator create orders for critical alerts.
    pub auto_replenishment: bool,
    /// Include the organization in the scheduled bulk recalculation.
    pub recalculation_enabled: bool,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            auto_replenishment: false,
            recalculation_enabled: true,
        }
    }
}

/// Organization-keyed settings guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct OrganizationSettingsStore {
    default_auto_replenishment: bool,
    inner: RwLock<HashMap<OrganizationId, OrganizationSettings>>,
}

impl OrganizationSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fallback for organizations without an explicit entry.
    pub fn with_default_auto_replenishment(mut self, enabled: bool) -> Self {
        self.default_auto_replenishment = enabled;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<OrganizationId, OrganizationSettings>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<OrganizationId, OrganizationSettings>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert(&self, organization_id: OrganizationId, settings: OrganizationSettings) {
        self.write().insert(organization_id, settings);
        info!(
            organization_id = %organization_id,
            auto_replenishment = settings.auto_replenishment,
            recalculation_enabled = settings.recalculation_enabled,
            "organization settings updated"
        );
    }

    pub fn remove(&self, organization_id: OrganizationId) -> Option<OrganizationSettings> {
        self.write().remove(&organization_id)
    }

    pub fn get(&self, organization_id: OrganizationId) -> Option<OrganizationSettings> {
        self.read().get(&organization_id).copied()
    }

    pub fn auto_replenishment_enabled(&self, organization_id: OrganizationId) -> bool {
        self.get(organization_id)
            .map(|s| s.auto_replenishment)
            .unwrap_or(self.default_auto_replenishment)
    }

    /// Organizations enrolled in scheduled recalculation, in stable order.
    pub fn recalculation_targets(&self) -> Vec<OrganizationId> {
        let mut ids: Vec<OrganizationId> = self
            .read()
            .iter()
            .filter(|(_, s)| s.recalculation_enabled)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}
