//! Strictly increasing 64-bit identifiers for players, competitions and score rows.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rankport_core::error::{RankportError, Result};

use crate::db::{CenterDb, is_busy};

/// Attempts before a busy sequence table is reported as exhausted.
pub const MAX_DISPENSE_ATTEMPTS: usize = 100;

/// Dispenses identifiers. IDs only promise uniqueness and creation order.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<u64>;
}

/// ID sequence persisted in the central database, so ordering survives restarts.
pub struct SqliteIdGenerator {
    db: Arc<CenterDb>,
}

impl SqliteIdGenerator {
    pub fn new(db: Arc<CenterDb>) -> Self {
        Self { db }
    }
}

impl IdGenerator for SqliteIdGenerator {
    fn next_id(&self) -> Result<u64> {
        let mut last_err = None;
        for attempt in 0..MAX_DISPENSE_ATTEMPTS {
            let conn = self.db.conn();
            // AUTOINCREMENT never hands out a rowid twice, even after the REPLACE
            // deletes the previous stub row.
            match conn.execute("REPLACE INTO id_generator (stub) VALUES ('a')", []) {
                Ok(_) => return Ok(conn.last_insert_rowid() as u64),
                Err(e) if is_busy(&e) => {
                    drop(conn);
                    tracing::debug!("id_generator busy (attempt {})", attempt + 1);
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => return Err(RankportError::internal(format!("Dispense id: {e}"))),
            }
        }
        Err(RankportError::internal(format!(
            "Dispense id: gave up after {MAX_DISPENSE_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

/// In-process counter.
pub struct SequenceIdGenerator {
    next: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map_err(|_| RankportError::internal("Dispense id: sequence exhausted"))
    }
}
