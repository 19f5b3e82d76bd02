//! SQLite-backed node assignment

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{
    normalize_principal, Assignment, IdentityId, IdentityRecord, Node, NodeAssignment, NodeId,
    StoreResult,
};
use crate::error::TokenServerError;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// How long a writer waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable assignment store.
///
/// First-time assignment runs inside an `IMMEDIATE` transaction and relies on
/// the `UNIQUE(principal)` constraint, so two processes sharing the database
/// file still agree on a single record per principal.
pub struct SqliteAssignment {
    conn: Mutex<Connection>,
}

impl SqliteAssignment {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> StoreResult<()> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Current schema version, 0 on a fresh database
    fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
        let table_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })?)
    }

    fn migrate_v1(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                capacity INTEGER NOT NULL,
                current_load INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS identities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                principal TEXT NOT NULL UNIQUE,
                node_id INTEGER NOT NULL REFERENCES nodes(id),
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_identities_node ON identities(node_id);
            "#,
        )?;
        Ok(())
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: NodeId(row.get::<_, i64>(0)? as u64),
        url: row.get(1)?,
        capacity: row.get::<_, i64>(2)? as u64,
        current_load: row.get::<_, i64>(3)? as u64,
    })
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<IdentityRecord> {
    let created_at: String = row.get(3)?;
    Ok(IdentityRecord {
        id: IdentityId(row.get::<_, i64>(0)? as u64),
        principal: row.get(1)?,
        node_id: NodeId(row.get::<_, i64>(2)? as u64),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
    })
}

/// Existing assignment for an already normalized principal
fn lookup(conn: &Connection, principal: &str) -> rusqlite::Result<Option<(IdentityId, NodeId, String)>> {
    conn.query_row(
        "SELECT i.id, n.id, n.url FROM identities i JOIN nodes n ON n.id = i.node_id
         WHERE i.principal = ?1",
        params![principal],
        |row| {
            Ok((
                IdentityId(row.get::<_, i64>(0)? as u64),
                NodeId(row.get::<_, i64>(1)? as u64),
                row.get(2)?,
            ))
        },
    )
    .optional()
}

fn all_nodes(conn: &Connection) -> rusqlite::Result<Vec<Node>> {
    let mut stmt =
        conn.prepare("SELECT id, url, capacity, current_load FROM nodes ORDER BY id")?;
    let nodes = stmt
        .query_map([], node_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

impl NodeAssignment for SqliteAssignment {
    fn assign(&self, principal: &str) -> StoreResult<Assignment> {
        let principal = normalize_principal(principal);
        let mut conn = self.conn.lock().unwrap();

        if let Some((identity_id, node_id, node_url)) = lookup(&conn, &principal)? {
            return Ok(Assignment {
                identity_id,
                node_id,
                node_url,
                created: false,
            });
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // another connection may have assigned it while we waited for the write lock
        if let Some((identity_id, node_id, node_url)) = lookup(&tx, &principal)? {
            tx.commit()?;
            return Ok(Assignment {
                identity_id,
                node_id,
                node_url,
                created: false,
            });
        }

        let nodes = all_nodes(&tx)?;
        let node_id = Node::least_loaded(&nodes)
            .map(|n| n.id)
            .ok_or(TokenServerError::NodeUnavailable)?;

        let inserted = tx.execute(
            "INSERT INTO identities (principal, node_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(principal) DO NOTHING",
            params![principal, node_id.0 as i64, Utc::now().to_rfc3339()],
        )?;
        if inserted == 1 {
            tx.execute(
                "UPDATE nodes SET current_load = current_load + 1 WHERE id = ?1",
                params![node_id.0 as i64],
            )?;
        }

        // whoever inserted first owns the record
        let (identity_id, node_id, node_url) = lookup(&tx, &principal)?.ok_or_else(|| {
            TokenServerError::Internal(format!("identity for {} vanished mid-transaction", principal))
        })?;
        tx.commit()?;

        if inserted == 1 {
            tracing::info!(principal = %principal, node = ?node_id, "Assigned new identity");
        }
        Ok(Assignment {
            identity_id,
            node_id,
            node_url,
            created: inserted == 1,
        })
    }

    fn get_identity(&self, principal: &str) -> StoreResult<Option<IdentityRecord>> {
        let principal = normalize_principal(principal);
        let conn = self.conn.lock().unwrap();

        Ok(conn
            .query_row(
                "SELECT id, principal, node_id, created_at FROM identities WHERE principal = ?1",
                params![principal],
                identity_from_row,
            )
            .optional()?)
    }

    fn add_node(&self, url: &str, capacity: u64) -> StoreResult<NodeId> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO nodes (url, capacity) VALUES (?1, ?2)
             ON CONFLICT(url) DO UPDATE SET capacity = excluded.capacity",
            params![url, capacity as i64],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM nodes WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(NodeId(id as u64))
    }

    fn list_nodes(&self) -> StoreResult<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        Ok(all_nodes(&conn)?)
    }
}
