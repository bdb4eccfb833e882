//! Local relational store: the connection handle, its schema and migration
//! ledger, and typed row helpers.
//!
//! Row helpers are free functions over a `&Connection` so that a caller can
//! group several of them in one transaction with [`Store::transaction`].

pub mod bootstrap;
pub mod cipher;
pub mod contacts;
pub mod discussions;
pub mod fyles;
pub mod groups;
pub mod identities;
pub mod invitations;
pub mod messages;
pub mod migrations;
pub mod path;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

pub use bootstrap::{Bootstrapper, OpenOutcome};
pub use cipher::{SqlCipher, StoreCipher, StoreKey};

use crate::error::Result;

/// Shared handle on the store file, passed around as `Arc<Store>`.
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    outcome: OpenOutcome,
}

impl Store {
    pub(crate) fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        outcome: OpenOutcome,
    ) -> Self {
        Self {
            conn: Mutex::new(conn),
            path,
            outcome,
        }
    }

    /// Opens a private in-memory store at the latest schema version.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure_connection(&conn)?;
        migrations::initialize(&mut conn)?;
        Ok(Self::from_connection(conn, None, OpenOutcome::Plaintext))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn();
        f(&*conn)
    }

    /// Runs `f` in one write transaction, committed when `f` returns `Ok`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn open_outcome(&self) -> OpenOutcome {
        self.outcome
    }

    pub fn schema_version(&self) -> Result<u32> {
        migrations::schema_version(&self.conn())
    }

    /// Row counts of the main tables.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let count = |table: &str| -> Result<i64> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
        };
        Ok(StoreStats {
            owned_identities: count("owned_identity")?,
            contacts: count("contact")?,
            groups_v1: count("contact_group")?,
            groups_v2: count("group2")?,
            discussions: count("discussion")?,
            locked_discussions: conn.query_row(
                "SELECT COUNT(*) FROM discussion WHERE status = 2",
                [],
                |row| row.get(0),
            )?,
            messages: count("message")?,
            fyles: count("fyle")?,
            invitations: count("invitation")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub owned_identities: i64,
    pub contacts: i64,
    pub groups_v1: i64,
    pub groups_v2: i64,
    pub discussions: i64,
    pub locked_discussions: i64,
    pub messages: i64,
    pub fyles: i64,
    pub invitations: i64,
}

/// Pragmas selected on every open, after the key and before any query.
pub(crate) fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "secure_delete", "ON")?;
    // Structural rewrites rename tables that others reference.
    conn.pragma_update(None, "legacy_alter_table", "ON")?;
    Ok(())
}

/// Current time in epoch milliseconds, the unit of every stored timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_open_in_memory_is_latest() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), migrations::LATEST_SCHEMA_VERSION);
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_pragmas_applied() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let fk: bool = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?;
                let secure: i64 = conn.query_row("PRAGMA secure_delete", [], |r| r.get(0))?;
                assert!(fk);
                assert_eq!(secure, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.transaction(|conn| {
            conn.execute(
                "INSERT INTO owned_identity (bytes_owned_identity, display_name) VALUES (x'01', 'Me')",
                [],
            )?;
            Err(Error::NotFound)
        });
        assert!(result.is_err());
        assert_eq!(store.stats().unwrap().owned_identities, 0);
    }
}
