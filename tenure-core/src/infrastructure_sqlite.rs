//! SQLite-backed LockStore implementation.
//! The `resource_locks` table is shared by every client pointing at the same
//! database file, across threads and processes.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! tenure-core = { path = "../tenure-core", features = ["sqlite"] }
//! ```

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::infrastructure::{InsertOutcome, LockStore, ReclaimOutcome};
use crate::types::{ClientId, LockRow, ResourceId};

const INSERT_LOCK: &str =
    "INSERT INTO resource_locks (resource_id, client_id, expiry) VALUES (?1, ?2, ?3)";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Connection(err.to_string())
    }
}

/// Only a duplicate `resource_id` means the lock is taken; NOT NULL, CHECK
/// and other constraint failures stay store faults.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// A lock store over a pool of SQLite connections.
///
/// Uses WAL mode so readers do not block the single writer, and a busy
/// timeout so competing writers queue instead of failing outright.
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLockStore {
    /// Open the pool described by `config`. Fails with
    /// [`StoreError::Connection`] if no connection can be established.
    /// The schema is not created here; run [`migrate_up`] first.
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let busy_timeout = config.busy_timeout();
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connect_timeout())
            .build(manager)?;

        tracing::debug!(path = %config.path.display(), pool_size = config.pool_size, "Lock store connected");
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    fn row_to_lock(row: &rusqlite::Row) -> rusqlite::Result<LockRow> {
        Ok(LockRow {
            resource_id: ResourceId::new(row.get::<_, String>(0)?),
            client_id: ClientId::new(row.get::<_, String>(1)?),
            expiry: row.get(2)?,
            sequence_no: row.get(3)?,
        })
    }
}

impl LockStore for SqliteLockStore {
    fn insert(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
    ) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;
        match conn.execute(INSERT_LOCK, params![resource_id.as_str(), client_id.as_str(), expiry]) {
            Ok(_) => Ok(InsertOutcome::Inserted {
                sequence: conn.last_insert_rowid(),
            }),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::AlreadyLocked),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self, resource_id: &ResourceId) -> Result<Option<LockRow>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT resource_id, client_id, expiry, sequence_no
                 FROM resource_locks WHERE resource_id = ?1",
                params![resource_id.as_str()],
                Self::row_to_lock,
            )
            .optional()?;
        Ok(row)
    }

    fn reclaim(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        expiry: i64,
        now: i64,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so competing reclaimers
        // serialize here and the later one finds nothing left to delete.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx.execute(
            "DELETE FROM resource_locks WHERE resource_id = ?1 AND expiry < ?2",
            params![resource_id.as_str(), now],
        )?;
        if deleted != 1 {
            tracing::debug!(resource_id = %resource_id, deleted, "Expired lock delete affected an unexpected row count");
            tx.rollback()?;
            return Ok(ReclaimOutcome::RaceLost { deleted });
        }

        match tx.execute(INSERT_LOCK, params![resource_id.as_str(), client_id.as_str(), expiry]) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback()?;
                return Ok(ReclaimOutcome::RaceLost { deleted });
            }
            Err(e) => return Err(e.into()),
        }
        let sequence = tx.last_insert_rowid();
        tx.commit()?;
        Ok(ReclaimOutcome::Reclaimed { sequence })
    }

    fn delete(
        &self,
        resource_id: &ResourceId,
        client_id: &ClientId,
        sequence_no: i64,
    ) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM resource_locks
             WHERE resource_id = ?1 AND client_id = ?2 AND sequence_no = ?3",
            params![resource_id.as_str(), client_id.as_str(), sequence_no],
        )?;
        Ok(rows)
    }
}

// ─── Schema Migrations ──────────────────────────────────────────────────────

struct Migration {
    version: i64,
    name: &'static str,
    up: &'static str,
    down: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_resource_locks",
        // AUTOINCREMENT keeps sequence numbers from ever being reused, even
        // after the row with the highest value is deleted.
        up: "CREATE TABLE resource_locks (
                sequence_no INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id TEXT NOT NULL UNIQUE,
                client_id   TEXT NOT NULL,
                expiry      INTEGER NOT NULL
            );",
        down: "DROP TABLE IF EXISTS resource_locks;",
    },
    Migration {
        version: 2,
        name: "index_resource_locks_expiry",
        up: "CREATE INDEX idx_resource_locks_expiry ON resource_locks(expiry);",
        down: "DROP INDEX IF EXISTS idx_resource_locks_expiry;",
    },
];

/// Latest schema version this build knows how to create.
pub const SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied { from: i64, to: i64 },
    Reverted { from: i64 },
    /// The schema was already at the requested version.
    NoChange,
}

fn ensure_migration_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Bring the schema up to [`SCHEMA_VERSION`]. Safe to run repeatedly.
pub fn migrate_up(store: &SqliteLockStore) -> Result<MigrationOutcome, StoreError> {
    let mut conn = store.conn()?;
    ensure_migration_table(&conn)?;
    let from = current_version(&conn)?;
    if from > SCHEMA_VERSION {
        return Err(StoreError::Query(format!(
            "schema version {} is newer than supported {}",
            from, SCHEMA_VERSION
        )));
    }
    if from == SCHEMA_VERSION {
        return Ok(MigrationOutcome::NoChange);
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, strftime('%s', 'now'))",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(MigrationOutcome::Applied {
        from,
        to: SCHEMA_VERSION,
    })
}

/// Revert every applied migration, dropping the lock table.
pub fn migrate_down(store: &SqliteLockStore) -> Result<MigrationOutcome, StoreError> {
    let mut conn = store.conn()?;
    ensure_migration_table(&conn)?;
    let from = current_version(&conn)?;
    if from == 0 {
        return Ok(MigrationOutcome::NoChange);
    }

    for migration in MIGRATIONS.iter().rev().filter(|m| m.version <= from) {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(migration.down)?;
        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            params![migration.version],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, name = migration.name, "Reverted migration");
    }

    Ok(MigrationOutcome::Reverted { from })
}
