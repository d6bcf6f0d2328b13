//! Tenant directory: provisioning and partition handle cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{ADMIN_TENANT_NAME, TenantId};
use regex::Regex;

use crate::db::{CenterDb, TenantRow};
use crate::id::IdGenerator;
use crate::store::ScoreStore;

static TENANT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9-]{0,61}[a-z0-9]$").expect("Invalid tenant name regex")
});

/// Where partition databases live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionStorage {
    /// One SQLite file per tenant, `<dir>/<tenant_id>.db`.
    Directory(PathBuf),
    /// Process-local partitions that vanish with the directory.
    InMemory,
}

impl PartitionStorage {
    /// Empty path means in-memory.
    pub fn from_dir(dir: &str) -> Self {
        if dir.is_empty() {
            Self::InMemory
        } else {
            Self::Directory(PathBuf::from(dir))
        }
    }
}

/// An opened tenant partition.
pub struct TenantPartition {
    id: TenantId,
    name: String,
    store: ScoreStore,
}

impl TenantPartition {
    pub fn id(&self) -> TenantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ScoreStore {
        &self.store
    }
}

/// Registry of tenants and their open partitions.
pub struct TenantDirectory {
    center: Arc<CenterDb>,
    ids: Arc<dyn IdGenerator>,
    storage: PartitionStorage,
    busy_timeout: Duration,
    handles: RwLock<HashMap<String, Arc<TenantPartition>>>,
    /// Serializes partition creation; resolved handles never take it.
    creating: Mutex<()>,
}

impl TenantDirectory {
    pub fn new(
        center: Arc<CenterDb>,
        ids: Arc<dyn IdGenerator>,
        storage: PartitionStorage,
        busy_timeout: Duration,
    ) -> Result<Self> {
        if let PartitionStorage::Directory(dir) = &storage {
            std::fs::create_dir_all(dir)
                .map_err(|e| RankportError::internal(format!("Create partition dir {}: {e}", dir.display())))?;
        }
        Ok(Self {
            center,
            ids,
            storage,
            busy_timeout,
            handles: RwLock::new(HashMap::new()),
            creating: Mutex::new(()),
        })
    }

    pub fn center(&self) -> &Arc<CenterDb> {
        &self.center
    }

    /// Register a tenant and create its empty partition.
    pub fn provision(&self, name: &str, display_name: &str) -> Result<TenantRow> {
        validate_tenant_name(name)?;
        if display_name.trim().is_empty() {
            return Err(RankportError::validation("tenant display name must not be empty"));
        }

        let _creating = self.creating.lock();
        let tenant = self.center.create_tenant(name, display_name)?;
        let store = match self.open_partition(&tenant, true) {
            Ok(store) => store,
            Err(e) => {
                if let Err(cleanup) = self.center.delete_tenant(tenant.id) {
                    tracing::error!("rollback of tenant '{name}' failed: {cleanup}");
                }
                return Err(e);
            }
        };
        let partition = Arc::new(TenantPartition { id: tenant.id, name: tenant.name.clone(), store });
        self.handles.write().insert(tenant.name.clone(), partition);

        tracing::info!("provisioned tenant '{}' (id={})", tenant.name, tenant.id);
        Ok(tenant)
    }

    /// Open (once) and return the partition for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<TenantPartition>> {
        if let Some(partition) = self.handles.read().get(name) {
            return Ok(Arc::clone(partition));
        }

        let _creating = self.creating.lock();
        if let Some(partition) = self.handles.read().get(name) {
            return Ok(Arc::clone(partition));
        }

        let tenant = self.center.find_tenant_by_name(name)?
            .ok_or_else(|| RankportError::not_found(format!("tenant '{name}'")))?;
        let store = self.open_partition(&tenant, false)?;
        let partition = Arc::new(TenantPartition { id: tenant.id, name: tenant.name, store });
        self.handles.write().insert(name.to_string(), Arc::clone(&partition));
        tracing::debug!("opened partition for tenant '{name}'");
        Ok(partition)
    }

    /// Tenants whose name is at or after `before`, ascending.
    pub fn list_tenants(&self, before: Option<&str>, limit: usize) -> Result<Vec<TenantRow>> {
        self.center.list_tenants(before, limit)
    }

    pub fn update_display_name(&self, name: &str, display_name: &str) -> Result<TenantRow> {
        if display_name.trim().is_empty() {
            return Err(RankportError::validation("tenant display name must not be empty"));
        }
        self.center.update_tenant_display_name(name, display_name)
    }

    fn open_partition(&self, tenant: &TenantRow, create: bool) -> Result<ScoreStore> {
        match &self.storage {
            PartitionStorage::Directory(dir) => {
                let path = partition_path(dir, tenant.id);
                if create && path.exists() {
                    return Err(RankportError::internal(format!(
                        "partition {} already exists for new tenant '{}'", path.display(), tenant.name
                    )));
                }
                ScoreStore::open(tenant.id, &path, create, self.busy_timeout, Arc::clone(&self.ids))
            }
            PartitionStorage::InMemory => ScoreStore::in_memory(tenant.id, Arc::clone(&self.ids)),
        }
    }
}

pub fn partition_path(dir: &Path, tenant_id: TenantId) -> PathBuf {
    dir.join(format!("{tenant_id}.db"))
}

/// Tenant names are DNS labels: lowercase, digits and inner hyphens, 2–63 chars.
pub fn validate_tenant_name(name: &str) -> Result<()> {
    if name == ADMIN_TENANT_NAME {
        return Err(RankportError::validation(format!("tenant name '{name}' is reserved")));
    }
    if !TENANT_NAME.is_match(name) {
        return Err(RankportError::validation(format!("invalid tenant name: {name:?}")));
    }
    Ok(())
}
