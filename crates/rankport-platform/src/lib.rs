//! # Rankport Platform
//!
//! The scoring engine: central database, tenant partitions, viewer
//! authentication, visit tracking, billing and rankings.

pub mod auth;
pub mod billing;
pub mod db;
pub mod id;
pub mod ranking;
pub mod sheet;
pub mod store;
pub mod tenant;
pub mod visit;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rankport_core::config::{BillingConfig, RankportConfig};
use rankport_core::error::Result;

pub use auth::ViewerAuthority;
pub use billing::BillingCalculator;
pub use db::CenterDb;
pub use id::{IdGenerator, SequenceIdGenerator, SqliteIdGenerator};
pub use ranking::RankingEngine;
pub use store::ScoreStore;
pub use tenant::{PartitionStorage, TenantDirectory, TenantPartition};
pub use visit::VisitTracker;

/// Every engine component, wired to one central database.
pub struct Platform {
    center: Arc<CenterDb>,
    directory: TenantDirectory,
    authority: ViewerAuthority,
    visits: VisitTracker,
    billing: BillingCalculator,
    ranking: RankingEngine,
}

impl Platform {
    /// Open the databases named by `config`.
    pub fn open(config: &RankportConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.storage.busy_timeout_ms);
        let center = Arc::new(CenterDb::open_with_timeout(Path::new(&config.storage.center_db_path), busy_timeout)?);
        let ids: Arc<dyn IdGenerator> = Arc::new(SqliteIdGenerator::new(Arc::clone(&center)));
        let storage = PartitionStorage::from_dir(&config.storage.tenant_db_dir);
        let authority = ViewerAuthority::from_config(&config.auth)?;
        tracing::info!(
            "platform storage: center={} partitions={:?}",
            config.storage.center_db_path, storage
        );
        Self::assemble(center, ids, storage, busy_timeout, authority, config.billing)
    }

    /// Fully in-memory platform.
    pub fn in_memory(authority: ViewerAuthority) -> Result<Self> {
        let center = Arc::new(CenterDb::open(Path::new(":memory:"))?);
        let ids: Arc<dyn IdGenerator> = Arc::new(SqliteIdGenerator::new(Arc::clone(&center)));
        Self::assemble(center, ids, PartitionStorage::InMemory, db::DEFAULT_BUSY_TIMEOUT, authority, BillingConfig::default())
    }

    fn assemble(
        center: Arc<CenterDb>,
        ids: Arc<dyn IdGenerator>,
        storage: PartitionStorage,
        busy_timeout: Duration,
        authority: ViewerAuthority,
        rates: BillingConfig,
    ) -> Result<Self> {
        let directory = TenantDirectory::new(Arc::clone(&center), ids, storage, busy_timeout)?;
        let visits = VisitTracker::new(Arc::clone(&center));
        let billing = BillingCalculator::new(Arc::clone(&center), visits.clone(), rates);
        let ranking = RankingEngine::new(visits.clone());
        Ok(Self { center, directory, authority, visits, billing, ranking })
    }

    pub fn center(&self) -> &CenterDb {
        &self.center
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    pub fn authority(&self) -> &ViewerAuthority {
        &self.authority
    }

    pub fn visits(&self) -> &VisitTracker {
        &self.visits
    }

    pub fn billing(&self) -> &BillingCalculator {
        &self.billing
    }

    pub fn ranking(&self) -> &RankingEngine {
        &self.ranking
    }
}
