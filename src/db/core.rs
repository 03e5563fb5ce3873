use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

use super::types::{AuditFilter, Entity};
use crate::notifier::Notifier;

/// Handle to one PictoDb store. Cheap to clone; clones share the underlying
/// connection, subscription table, and notifier.
#[derive(Clone)]
pub struct Db {
    pub(crate) conn: Arc<RwLock<Connection>>,
    pub(crate) subscriptions: Arc<RwLock<HashMap<String, AuditFilter>>>,
    pub(crate) notifier: Notifier<serde_json::Value>,
}

impl Db {
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::migrations().to_latest(&mut conn)?;

        Ok(Db {
            conn: Arc::new(RwLock::new(conn)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            notifier: Notifier::new(),
        })
    }

    fn migrations() -> Migrations<'static> {
        Migrations::new(vec![M::up(
            "
            CREATE TABLE document (
                org_id        TEXT NOT NULL,
                document_type TEXT NOT NULL,
                document_id   TEXT NOT NULL,
                body          TEXT NOT NULL,
                updated_at    INTEGER NOT NULL,
                PRIMARY KEY (org_id, document_type, document_id)
            );

            CREATE TABLE audit_log (
                id            TEXT NOT NULL PRIMARY KEY,
                org_id        TEXT NOT NULL,
                actor_id      TEXT NOT NULL,
                document_type TEXT NOT NULL,
                document_id   TEXT NOT NULL,
                changes       TEXT NOT NULL,
                description   TEXT NOT NULL,
                timestamp     INTEGER NOT NULL
            );

            CREATE INDEX idx_audit_log_org_time
                ON audit_log (org_id, timestamp DESC);
            CREATE INDEX idx_audit_log_document
                ON audit_log (org_id, document_type, document_id);
            ",
        )])
    }

    pub(crate) fn query_rows<T: Entity>(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<T>> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;

        log::debug!("SQL QUERY: {}", sql);
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(serde_rusqlite::from_row::<T>(row)?);
        }

        Ok(results)
    }
}
