//! First-visit log for competition ranking pages, stored centrally.

use std::collections::HashMap;
use std::sync::Arc;

use rankport_core::error::Result;
use rankport_core::types::{CompetitionId, PlayerId, TenantId};
use rusqlite::params;

use crate::db::{CenterDb, db_err};

#[derive(Clone)]
pub struct VisitTracker {
    db: Arc<CenterDb>,
}

impl VisitTracker {
    pub fn new(db: Arc<CenterDb>) -> Self {
        Self { db }
    }

    /// Record that `player_id` opened the ranking page at `at` (unix seconds).
    ///
    /// Only the first visit per `(tenant, competition, player)` is stored; later
    /// calls are no-ops. Returns whether this call created the record.
    pub fn record_visit(
        &self,
        tenant_id: TenantId,
        competition_id: CompetitionId,
        player_id: PlayerId,
        at: i64,
    ) -> Result<bool> {
        let inserted = self.db.conn().execute(
            "INSERT INTO visit_history (tenant_id, competition_id, player_id, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tenant_id, competition_id, player_id) DO NOTHING",
            params![tenant_id, competition_id, player_id, at],
        ).map_err(db_err(format!(
            "Insert visit tenant={tenant_id} competition={competition_id} player={player_id}"
        )))?;
        if inserted > 0 {
            tracing::debug!(tenant_id, competition_id, player_id, "first ranking visit recorded");
        }
        Ok(inserted > 0)
    }

    /// Every player who ever visited, with their first-visit time.
    pub fn visitors(&self, tenant_id: TenantId, competition_id: CompetitionId) -> Result<HashMap<PlayerId, i64>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT player_id, created_at FROM visit_history WHERE tenant_id = ?1 AND competition_id = ?2"
        ).map_err(db_err("Prepare visitors"))?;
        let visitors = stmt.query_map(params![tenant_id, competition_id], |row| {
            Ok((row.get::<_, PlayerId>(0)?, row.get::<_, i64>(1)?))
        }).map_err(db_err(format!("Query visitors tenant={tenant_id} competition={competition_id}")))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(db_err("Read visit row"))?;
        Ok(visitors)
    }
}
