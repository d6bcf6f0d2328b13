//! Central database: the tenant registry plus the cross-tenant tables
//! (id sequence, visit history, billing cache).

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rankport_core::error::{RankportError, Result};
use rankport_core::types::{TenantDetail, TenantId};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

pub(crate) const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Central database shared by every tenant.
pub struct CenterDb {
    conn: Mutex<Connection>,
}

/// Tenant record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TenantRow {
    pub id: TenantId,
    pub name: String,
    pub display_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TenantRow {
    pub fn detail(&self) -> TenantDetail {
        TenantDetail { name: self.name.clone(), display_name: self.display_name.clone() }
    }
}

impl CenterDb {
    /// Open or create the central database.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = open_connection(path, true, busy_timeout)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn.lock().execute_batch("
            CREATE TABLE IF NOT EXISTS tenant (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS id_generator (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stub TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS visit_history (
                tenant_id INTEGER NOT NULL,
                competition_id INTEGER NOT NULL,
                player_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, competition_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS billing_report (
                tenant_id INTEGER NOT NULL,
                competition_id INTEGER NOT NULL,
                competition_title TEXT NOT NULL,
                player_count INTEGER NOT NULL,
                billing_yen INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, competition_id)
            );
        ").map_err(db_err("Center migration"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // ── Tenant CRUD ────────────────────────────────────

    /// Insert a tenant. A taken name is a `Conflict`.
    pub fn create_tenant(&self, name: &str, display_name: &str) -> Result<TenantRow> {
        let now = now_unix();
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO tenant (name, display_name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![name, display_name, now],
            ).map_err(|e| {
                if is_constraint_violation(&e) {
                    RankportError::conflict(format!("tenant '{name}' already exists"))
                } else {
                    RankportError::internal(format!("Insert tenant name={name}: {e}"))
                }
            })?;
            conn.last_insert_rowid()
        };
        self.get_tenant(id as TenantId)
    }

    /// Get a tenant by ID.
    pub fn get_tenant(&self, id: TenantId) -> Result<TenantRow> {
        self.conn.lock().query_row(
            "SELECT id, name, display_name, created_at, updated_at FROM tenant WHERE id = ?1",
            params![id],
            tenant_from_row,
        ).optional()
            .map_err(db_err(format!("Get tenant id={id}")))?
            .ok_or_else(|| RankportError::not_found(format!("tenant {id}")))
    }

    /// Look a tenant up by its slug.
    pub fn find_tenant_by_name(&self, name: &str) -> Result<Option<TenantRow>> {
        self.conn.lock().query_row(
            "SELECT id, name, display_name, created_at, updated_at FROM tenant WHERE name = ?1",
            params![name],
            tenant_from_row,
        ).optional().map_err(db_err(format!("Get tenant name={name}")))
    }

    /// Tenants whose name sorts at or after `before`, ascending by name.
    pub fn list_tenants(&self, before: Option<&str>, limit: usize) -> Result<Vec<TenantRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, display_name, created_at, updated_at FROM tenant WHERE name >= ?1 ORDER BY name ASC LIMIT ?2"
        ).map_err(db_err("Prepare list tenants"))?;

        let tenants = stmt.query_map(params![before.unwrap_or(""), limit as i64], tenant_from_row)
            .map_err(db_err("Query tenants"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read tenant row"))?;
        Ok(tenants)
    }

    /// Rename a tenant's display name, the only mutable tenant field.
    pub fn update_tenant_display_name(&self, name: &str, display_name: &str) -> Result<TenantRow> {
        let changed = self.conn.lock().execute(
            "UPDATE tenant SET display_name = ?1, updated_at = ?2 WHERE name = ?3",
            params![display_name, now_unix(), name],
        ).map_err(db_err(format!("Update tenant name={name}")))?;
        if changed == 0 {
            return Err(RankportError::not_found(format!("tenant '{name}'")));
        }
        self.find_tenant_by_name(name)?
            .ok_or_else(|| RankportError::not_found(format!("tenant '{name}'")))
    }

    /// Remove a tenant row whose partition could not be created.
    pub(crate) fn delete_tenant(&self, id: TenantId) -> Result<()> {
        self.conn.lock().execute("DELETE FROM tenant WHERE id = ?1", params![id])
            .map_err(db_err(format!("Delete tenant id={id}")))?;
        Ok(())
    }
}

fn tenant_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TenantRow> {
    Ok(TenantRow {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Open a SQLite connection. `create = false` requires the file to exist already.
pub(crate) fn open_connection(path: &Path, create: bool, busy_timeout: Duration) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = Connection::open_with_flags(path, flags)
        .map_err(db_err(format!("DB open {}", path.display())))?;
    conn.busy_timeout(busy_timeout)
        .map_err(db_err(format!("DB busy_timeout {}", path.display())))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(db_err(format!("DB pragma {}", path.display())))?;
    Ok(conn)
}

/// Wrap a storage error with the operation that hit it.
pub(crate) fn db_err<C: Display>(context: C) -> impl FnOnce(rusqlite::Error) -> RankportError {
    move |e| RankportError::internal(format!("{context}: {e}"))
}

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation)
}

pub(crate) fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
