use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;

use super::core::Db;
use super::diff::{compute_diff, describe_change_set};
use super::types::{AuditEntry, AuditFilter, ChangeSet, DEFAULT_QUERY_LIMIT};

impl Db {
    /// Diffs the supplied snapshots and appends one immutable entry to the
    /// organization's audit log, then notifies matching subscriptions.
    ///
    /// `before`/`after` are the document's field values immediately around
    /// the mutation; `None` models a document that did not exist. Identifying
    /// parameters are validated before any I/O. The append is a single
    /// atomic write and is never retried; storage errors propagate to the
    /// caller unchanged.
    pub fn record_change(
        &self,
        org_id: &str,
        actor_id: &str,
        document_type: &str,
        document_id: &str,
        before: Option<&Value>,
        after: Option<&Value>,
    ) -> Result<AuditEntry> {
        let changes = compute_diff(before, after);
        self.record_change_set(org_id, actor_id, document_type, document_id, changes)
    }

    pub(crate) fn record_change_set(
        &self,
        org_id: &str,
        actor_id: &str,
        document_type: &str,
        document_id: &str,
        changes: ChangeSet,
    ) -> Result<AuditEntry> {
        let entry = Self::build_entry(org_id, actor_id, document_type, document_id, changes)?;

        {
            let conn = self
                .conn
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
            Self::append_entry(&conn, &entry)?;
        }

        // Lock released before subscriptions re-query
        self.notify_audit_subscribers(&entry)?;

        Ok(entry)
    }

    pub(crate) fn build_entry(
        org_id: &str,
        actor_id: &str,
        document_type: &str,
        document_id: &str,
        changes: ChangeSet,
    ) -> Result<AuditEntry> {
        validate_identifiers(org_id, actor_id, document_type, document_id)?;

        let description = describe_change_set(document_type, &changes);

        Ok(AuditEntry {
            id: Uuid::now_v7().to_string(),
            org_id: org_id.to_string(),
            actor_id: actor_id.to_string(),
            document_type: document_type.to_string(),
            document_id: document_id.to_string(),
            changes: serde_json::to_string(&changes)?,
            description,
            timestamp: now_millis()?,
        })
    }

    pub(crate) fn append_entry(conn: &rusqlite::Connection, entry: &AuditEntry) -> Result<()> {
        log::debug!(
            "SQL EXECUTE: INSERT INTO audit_log (id, org_id, actor_id, document_type, document_id, changes, description, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let affected = conn.execute(
            "INSERT INTO audit_log (id, org_id, actor_id, document_type, document_id, changes, description, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                entry.id,
                entry.org_id,
                entry.actor_id,
                entry.document_type,
                entry.document_id,
                entry.changes,
                entry.description,
                entry.timestamp,
            ],
        )?;
        log::debug!("SQL EXECUTE RESULT: {} rows affected", affected);
        Ok(())
    }

    /// Pull mode: bounded, filtered window over the audit log, most recent
    /// first. Ties on timestamp break by id, which is time-sortable.
    pub fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        anyhow::ensure!(
            !filter.org_id.is_empty(),
            "org_id is required for audit queries"
        );

        let mut sql = String::from(
            "SELECT id, org_id, actor_id, document_type, document_id, changes, description, timestamp \
             FROM audit_log WHERE org_id = ?",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(filter.org_id.clone())];

        if let Some(actor_id) = &filter.actor_id {
            sql.push_str(" AND actor_id = ?");
            params.push(Box::new(actor_id.clone()));
        }
        if let Some(document_type) = &filter.document_type {
            sql.push_str(" AND document_type = ?");
            params.push(Box::new(document_type.clone()));
        }
        if let Some(document_id) = &filter.document_id {
            sql.push_str(" AND document_id = ?");
            params.push(Box::new(document_id.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp <= ?");
            params.push(Box::new(until));
        }

        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");
        params.push(Box::new(filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        self.query_rows(&sql, &param_refs)
    }

    /// The change-history view: every recorded change for one document,
    /// oldest first.
    pub fn document_history(
        &self,
        org_id: &str,
        document_type: &str,
        document_id: &str,
    ) -> Result<Vec<AuditEntry>> {
        anyhow::ensure!(!org_id.is_empty(), "org_id is required for audit queries");

        self.query_rows(
            "SELECT id, org_id, actor_id, document_type, document_id, changes, description, timestamp \
             FROM audit_log \
             WHERE org_id = ? AND document_type = ? AND document_id = ? \
             ORDER BY timestamp ASC, id ASC",
            &[&org_id, &document_type, &document_id],
        )
    }
}

pub(crate) fn validate_identifiers(
    org_id: &str,
    actor_id: &str,
    document_type: &str,
    document_id: &str,
) -> Result<()> {
    anyhow::ensure!(!org_id.is_empty(), "org_id is required");
    anyhow::ensure!(!actor_id.is_empty(), "actor_id is required");
    anyhow::ensure!(!document_type.is_empty(), "document_type is required");
    anyhow::ensure!(!document_id.is_empty(), "document_id is required");
    Ok(())
}

pub(crate) fn now_millis() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as i64)
}
