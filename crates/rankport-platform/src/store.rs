//! Per-tenant partition store: roster, competitions and score sheets.
//!
//! Each partition owns one SQLite connection behind its own mutex, so work on
//! one tenant never waits on another. Multi-row writes run in a single
//! transaction and roll back on any error.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{
    CompetitionDetail, CompetitionId, PlayerDetail, PlayerId, PlayerScoreDetail, ScoreRow, TenantId,
};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::db::{db_err, is_constraint_violation, now_unix, open_connection};
use crate::id::IdGenerator;

/// Player record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRow {
    pub id: PlayerId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub is_disqualified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PlayerRow {
    pub fn detail(&self) -> PlayerDetail {
        PlayerDetail {
            id: self.id,
            display_name: self.display_name.clone(),
            is_disqualified: self.is_disqualified,
        }
    }
}

/// Competition record. `finished_at` is set once, on finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompetitionRow {
    pub id: CompetitionId,
    pub tenant_id: TenantId,
    pub title: String,
    pub finished_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CompetitionRow {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn detail(&self) -> CompetitionDetail {
        CompetitionDetail { id: self.id, title: self.title.clone(), is_finished: self.is_finished() }
    }
}

/// A stored score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    pub id: u64,
    pub player_id: PlayerId,
    pub competition_id: CompetitionId,
    pub score: i64,
    /// 1-based line of the submitted sheet this score came from.
    pub row_number: i64,
    pub created_at: i64,
}

/// A competition together with the players holding a score in it, read atomically.
#[derive(Debug, Clone)]
pub struct ScoringSnapshot {
    pub competition: CompetitionRow,
    pub scorers: BTreeSet<PlayerId>,
}

/// Unordered ranking input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedScore {
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: i64,
}

/// Storage for a single tenant partition.
pub struct ScoreStore {
    tenant_id: TenantId,
    conn: Mutex<Connection>,
    ids: Arc<dyn IdGenerator>,
}

impl ScoreStore {
    /// Open a partition file. With `create = false` the file must already exist.
    pub fn open(
        tenant_id: TenantId,
        path: &Path,
        create: bool,
        busy_timeout: Duration,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let conn = open_connection(path, create, busy_timeout)?;
        let store = Self { tenant_id, conn: Mutex::new(conn), ids };
        store.migrate()?;
        Ok(store)
    }

    pub fn in_memory(tenant_id: TenantId, ids: Arc<dyn IdGenerator>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Open in-memory partition"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err("Partition pragma"))?;
        let store = Self { tenant_id, conn: Mutex::new(conn), ids };
        store.migrate()?;
        Ok(store)
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn migrate(&self) -> Result<()> {
        self.conn.lock().execute_batch("
            CREATE TABLE IF NOT EXISTS player (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL,
                display_name TEXT NOT NULL UNIQUE,
                is_disqualified INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS competition (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                finished_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS player_score (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL,
                player_id INTEGER NOT NULL REFERENCES player(id),
                competition_id INTEGER NOT NULL REFERENCES competition(id),
                score INTEGER NOT NULL,
                row_number INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (competition_id, player_id)
            );

            CREATE INDEX IF NOT EXISTS player_score_by_competition
                ON player_score (competition_id, score);
        ").map_err(db_err(format!("Partition migration tenant={}", self.tenant_id)))?;
        Ok(())
    }

    // ── Players ────────────────────────────────────

    /// Register players in input order, all-or-nothing.
    pub fn add_players(&self, display_names: &[String]) -> Result<Vec<PlayerDetail>> {
        if let Some(bad) = display_names.iter().find(|n| n.trim().is_empty()) {
            return Err(RankportError::validation(format!("invalid player name: {bad:?}")));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Begin add players"))?;
        let now = now_unix();
        let mut players = Vec::with_capacity(display_names.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO player (id, tenant_id, display_name, is_disqualified, created_at, updated_at) VALUES (?1, ?2, ?3, 0, ?4, ?4)"
            ).map_err(db_err("Prepare insert player"))?;
            for name in display_names {
                let id = self.ids.next_id()?;
                stmt.execute(params![id, self.tenant_id, name, now]).map_err(|e| {
                    if is_constraint_violation(&e) {
                        RankportError::conflict(format!("player name '{name}' is taken"))
                    } else {
                        RankportError::internal(format!("Insert player id={id} name={name}: {e}"))
                    }
                })?;
                players.push(PlayerDetail { id, display_name: name.clone(), is_disqualified: false });
            }
        }
        tx.commit().map_err(db_err("Commit add players"))?;
        Ok(players)
    }

    /// Mark a player disqualified. Never reverts.
    pub fn disqualify(&self, player_id: PlayerId) -> Result<PlayerDetail> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE player SET is_disqualified = 1, updated_at = ?1 WHERE id = ?2",
            params![now_unix(), player_id],
        ).map_err(db_err(format!("Disqualify player id={player_id}")))?;
        if changed == 0 {
            return Err(RankportError::not_found(format!("player {player_id}")));
        }
        player_in(&conn, player_id).map(|p| p.detail())
    }

    pub fn get_player(&self, player_id: PlayerId) -> Result<PlayerRow> {
        player_in(&self.conn.lock(), player_id)
    }

    pub fn find_player_by_name(&self, display_name: &str) -> Result<Option<PlayerRow>> {
        self.conn.lock().query_row(
            "SELECT id, tenant_id, display_name, is_disqualified, created_at, updated_at FROM player WHERE display_name = ?1",
            params![display_name],
            player_from_row,
        ).optional().map_err(db_err(format!("Get player name={display_name}")))
    }

    pub fn list_players(&self) -> Result<Vec<PlayerRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, display_name, is_disqualified, created_at, updated_at FROM player ORDER BY id ASC"
        ).map_err(db_err("Prepare list players"))?;
        let players = stmt.query_map([], player_from_row)
            .map_err(db_err("Query players"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read player row"))?;
        Ok(players)
    }

    // ── Competitions ────────────────────────────────────

    pub fn add_competition(&self, title: &str) -> Result<CompetitionRow> {
        if title.trim().is_empty() {
            return Err(RankportError::validation("competition title must not be empty"));
        }
        let id = self.ids.next_id()?;
        let now = now_unix();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO competition (id, tenant_id, title, finished_at, created_at, updated_at) VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
            params![id, self.tenant_id, title, now],
        ).map_err(db_err(format!("Insert competition id={id} title={title}")))?;
        competition_in(&conn, id)
    }

    /// Finalize a competition. Repeated calls keep the first timestamp.
    pub fn finish_competition(&self, competition_id: CompetitionId) -> Result<CompetitionRow> {
        let now = now_unix();
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE competition SET finished_at = COALESCE(finished_at, ?1), updated_at = ?1 WHERE id = ?2",
            params![now, competition_id],
        ).map_err(db_err(format!("Finish competition id={competition_id}")))?;
        if changed == 0 {
            return Err(RankportError::not_found(format!("competition {competition_id}")));
        }
        competition_in(&conn, competition_id)
    }

    pub fn get_competition(&self, competition_id: CompetitionId) -> Result<CompetitionRow> {
        competition_in(&self.conn.lock(), competition_id)
    }

    /// All competitions, oldest first.
    pub fn list_competitions(&self) -> Result<Vec<CompetitionRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, title, finished_at, created_at, updated_at FROM competition ORDER BY id ASC"
        ).map_err(db_err("Prepare list competitions"))?;
        let competitions = stmt.query_map([], competition_from_row)
            .map_err(db_err("Query competitions"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read competition row"))?;
        Ok(competitions)
    }

    // ── Scores ────────────────────────────────────

    /// Swap in a new score sheet for `competition_id`.
    ///
    /// Rejected once the competition is finished. When a sheet names the same player
    /// more than once, the later row wins. Returns the number of stored entries.
    pub fn replace_scores(&self, competition_id: CompetitionId, rows: &[ScoreRow]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Begin replace scores"))?;

        let competition = competition_in(&tx, competition_id)?;
        if competition.is_finished() {
            return Err(RankportError::conflict(format!("competition {competition_id} is finished")));
        }

        let mut latest: HashMap<PlayerId, (i64, i64)> = HashMap::with_capacity(rows.len());
        {
            let mut lookup = tx.prepare_cached("SELECT id FROM player WHERE display_name = ?1")
                .map_err(db_err("Prepare player lookup"))?;
            for (i, row) in rows.iter().enumerate() {
                let player_id: Option<PlayerId> = lookup.query_row(params![row.player_name], |r| r.get(0))
                    .optional()
                    .map_err(db_err(format!("Lookup player name={}", row.player_name)))?;
                let player_id = player_id.ok_or_else(|| {
                    RankportError::validation(format!("unknown player '{}' on row {}", row.player_name, i + 1))
                })?;
                latest.insert(player_id, (row.score, i as i64 + 1));
            }
        }

        tx.execute("DELETE FROM player_score WHERE competition_id = ?1", params![competition_id])
            .map_err(db_err(format!("Delete scores competition={competition_id}")))?;

        let mut entries: Vec<(PlayerId, i64, i64)> =
            latest.into_iter().map(|(player, (score, row))| (player, score, row)).collect();
        entries.sort_by_key(|&(_, _, row)| row);

        let now = now_unix();
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO player_score (id, tenant_id, player_id, competition_id, score, row_number, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ).map_err(db_err("Prepare insert score"))?;
            for &(player_id, score, row_number) in &entries {
                let id = self.ids.next_id()?;
                insert.execute(params![id, self.tenant_id, player_id, competition_id, score, row_number, now])
                    .map_err(db_err(format!(
                        "Insert score id={id} competition={competition_id} player={player_id}"
                    )))?;
            }
        }
        tx.commit().map_err(db_err("Commit replace scores"))?;
        Ok(entries.len())
    }

    /// Score entries for a competition, by ID.
    pub fn list_scores(&self, competition_id: CompetitionId) -> Result<Vec<ScoreEntry>> {
        let conn = self.conn.lock();
        competition_in(&conn, competition_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, player_id, competition_id, score, row_number, created_at FROM player_score WHERE competition_id = ?1 ORDER BY id ASC"
        ).map_err(db_err("Prepare list scores"))?;
        let scores = stmt.query_map(params![competition_id], |row| Ok(ScoreEntry {
            id: row.get(0)?, player_id: row.get(1)?, competition_id: row.get(2)?,
            score: row.get(3)?, row_number: row.get(4)?, created_at: row.get(5)?,
        })).map_err(db_err(format!("Query scores competition={competition_id}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read score row"))?;
        Ok(scores)
    }

    /// A player's score in every competition they appear in, oldest competition first.
    pub fn player_scores(&self, player_id: PlayerId) -> Result<Vec<PlayerScoreDetail>> {
        let conn = self.conn.lock();
        player_in(&conn, player_id)?;
        let mut stmt = conn.prepare(
            "SELECT c.title, ps.score FROM player_score ps
             JOIN competition c ON c.id = ps.competition_id
             WHERE ps.player_id = ?1
             ORDER BY c.created_at ASC, c.id ASC"
        ).map_err(db_err("Prepare player scores"))?;
        let scores = stmt.query_map(params![player_id], |row| Ok(PlayerScoreDetail {
            competition_title: row.get(0)?,
            score: row.get(1)?,
        })).map_err(db_err(format!("Query player scores player={player_id}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read player score row"))?;
        Ok(scores)
    }

    /// Competition row and scorer set from one transaction.
    pub fn scoring_snapshot(&self, competition_id: CompetitionId) -> Result<ScoringSnapshot> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err("Begin scoring snapshot"))?;
        let competition = competition_in(&tx, competition_id)?;
        let scorers = {
            let mut stmt = tx.prepare_cached("SELECT player_id FROM player_score WHERE competition_id = ?1")
                .map_err(db_err("Prepare scorers"))?;
            let scorers = stmt.query_map(params![competition_id], |row| row.get::<_, PlayerId>(0))
                .map_err(db_err(format!("Query scorers competition={competition_id}")))?
                .collect::<rusqlite::Result<BTreeSet<_>>>()
                .map_err(db_err("Read scorer row"))?;
            scorers
        };
        tx.commit().map_err(db_err("End scoring snapshot"))?;
        Ok(ScoringSnapshot { competition, scorers })
    }

    /// Competition row and every score with its player's name, from one transaction.
    pub fn ranking_snapshot(&self, competition_id: CompetitionId) -> Result<(CompetitionRow, Vec<RankedScore>)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err("Begin ranking snapshot"))?;
        let competition = competition_in(&tx, competition_id)?;
        let scores = {
            let mut stmt = tx.prepare_cached(
                "SELECT ps.player_id, p.display_name, ps.score FROM player_score ps
                 JOIN player p ON p.id = ps.player_id
                 WHERE ps.competition_id = ?1"
            ).map_err(db_err("Prepare ranking"))?;
            let scores = stmt.query_map(params![competition_id], |row| Ok(RankedScore {
                player_id: row.get(0)?,
                display_name: row.get(1)?,
                score: row.get(2)?,
            })).map_err(db_err(format!("Query ranking competition={competition_id}")))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("Read ranking row"))?;
            scores
        };
        tx.commit().map_err(db_err("End ranking snapshot"))?;
        Ok((competition, scores))
    }
}

fn player_in(conn: &Connection, player_id: PlayerId) -> Result<PlayerRow> {
    conn.query_row(
        "SELECT id, tenant_id, display_name, is_disqualified, created_at, updated_at FROM player WHERE id = ?1",
        params![player_id],
        player_from_row,
    ).optional()
        .map_err(db_err(format!("Get player id={player_id}")))?
        .ok_or_else(|| RankportError::not_found(format!("player {player_id}")))
}

fn competition_in(conn: &Connection, competition_id: CompetitionId) -> Result<CompetitionRow> {
    conn.query_row(
        "SELECT id, tenant_id, title, finished_at, created_at, updated_at FROM competition WHERE id = ?1",
        params![competition_id],
        competition_from_row,
    ).optional()
        .map_err(db_err(format!("Get competition id={competition_id}")))?
        .ok_or_else(|| RankportError::not_found(format!("competition {competition_id}")))
}

fn player_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerRow> {
    Ok(PlayerRow {
        id: row.get(0)?, tenant_id: row.get(1)?, display_name: row.get(2)?,
        is_disqualified: row.get(3)?, created_at: row.get(4)?, updated_at: row.get(5)?,
    })
}

fn competition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompetitionRow> {
    Ok(CompetitionRow {
        id: row.get(0)?, tenant_id: row.get(1)?, title: row.get(2)?,
        finished_at: row.get(3)?, created_at: row.get(4)?, updated_at: row.get(5)?,
    })
}
