//! SQLite job record store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{JobId, JobRecord, JobStore, StoreError};

/// Thread-safe SQLite store. Each job is one row holding the record JSON.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Every write is a single statement; a poisoned lock still guards a
        // consistent connection.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of jobs currently in `state`.
    pub fn count_in_state(&self, state: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = ?1",
            params![state],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

impl JobStore for SqliteStore {
    fn create(&self, id: &JobId) -> Result<(), StoreError> {
        let record = serde_json::to_string(&JobRecord::pending(id.link()))?;
        let now = now_str();

        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO jobs (id, state, record, created_at, updated_at) VALUES (?1, 'pending', ?2, ?3, ?3)",
            params![id.to_string(), record, now],
        )?;
        Ok(())
    }

    fn finalize(&self, id: &JobId, record: &JobRecord) -> Result<(), StoreError> {
        if !record.is_terminal() {
            return Err(StoreError::NotTerminal(*id));
        }
        let body = serde_json::to_string(record)?;

        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE jobs SET state = ?1, record = ?2, updated_at = ?3 WHERE id = ?4 AND state = 'pending'",
            params![record.state().as_str(), body, now_str(), id.to_string()],
        )?;
        if changed == 1 {
            return Ok(());
        }

        let exists: Option<String> = conn
            .query_row(
                "SELECT state FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Err(StoreError::AlreadyFinal(*id)),
            None => Err(StoreError::NotFound),
        }
    }

    fn read_raw(&self, id: &JobId) -> Result<String, StoreError> {
        let conn = self.conn();
        let body: Option<String> = conn
            .query_row(
                "SELECT record FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        body.ok_or(StoreError::NotFound)
    }
}
