use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;

use dago_core::error::{DagoError, Result};

/// Graph state retention, refreshed on every write.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);

    CREATE TABLE IF NOT EXISTS node_states (
        graph_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        value TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (graph_id, node_id)
    );

    CREATE INDEX IF NOT EXISTS idx_node_states_expires ON node_states(expires_at);

    CREATE TABLE IF NOT EXISTS stream_entries (
        stream TEXT NOT NULL,
        seq INTEGER NOT NULL,
        id TEXT NOT NULL,
        fields TEXT NOT NULL,
        PRIMARY KEY (stream, seq)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_stream_entries_id
        ON stream_entries(stream, id);

    CREATE TABLE IF NOT EXISTS stream_groups (
        stream TEXT NOT NULL,
        grp TEXT NOT NULL,
        last_delivered INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (stream, grp)
    );

    CREATE TABLE IF NOT EXISTS stream_pending (
        stream TEXT NOT NULL,
        grp TEXT NOT NULL,
        seq INTEGER NOT NULL,
        consumer TEXT NOT NULL,
        delivered_at INTEGER NOT NULL,
        delivery_count INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (stream, grp, seq)
    );
";

/// SQLite-backed state store and stream broker.
///
/// Graph headers live in a key/value table with per-key expiry, node states
/// in their own table keyed by graph and node id. Streams are
/// emulated with an entries table, a per-group delivery cursor and a
/// per-group pending list, so several worker processes sharing one database
/// file get consumer-group delivery semantics.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    state_ttl: Duration,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DagoError::Store(format!("failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;

        // WAL lets readers proceed while another process writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        let store = Self::init(conn)?;
        let purged = store.purge_expired()?;
        debug!(path = %path.display(), purged, "SQLite store opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            state_ttl: DEFAULT_STATE_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    pub(crate) fn ttl_ms(&self) -> i64 {
        duration_ms(self.state_ttl)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DagoError::Store(format!("connection lock poisoned: {}", e)))
    }

    /// Drop every expired key and node state. Returns the number of rows removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let conn = self.conn()?;
        let keys = conn
            .execute("DELETE FROM kv WHERE expires_at <= ?1", params![now])
            .map_err(db_err)?;
        let nodes = conn
            .execute("DELETE FROM node_states WHERE expires_at <= ?1", params![now])
            .map_err(db_err)?;
        Ok(keys + nodes)
    }

    pub(crate) fn check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(db_err)?;
        Ok(())
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> DagoError {
    DagoError::Store(e.to_string())
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
