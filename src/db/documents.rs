use anyhow::Result;
use serde_json::Value;

use super::audit::validate_identifiers;
use super::core::Db;
use super::diff::{DELETE_MARKER, compute_diff};
use super::types::{AuditEntry, ChangeEntry, ChangeType};

impl Db {
    /// Creates or replaces one organization-scoped document. The prior body
    /// is captured as the before snapshot inside the same transaction that
    /// writes the new body and the audit row, so the recorded diff always
    /// matches what was actually stored. Returns the appended audit entry.
    pub fn put_document(
        &self,
        org_id: &str,
        actor_id: &str,
        document_type: &str,
        document_id: &str,
        body: &Value,
    ) -> Result<AuditEntry> {
        validate_identifiers(org_id, actor_id, document_type, document_id)?;
        let body_text = serde_json::to_string(body)?;

        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        let tx = conn.transaction()?;

        let before = Self::read_body(&tx, org_id, document_type, document_id)?;
        let changes = compute_diff(before.as_ref(), Some(body));
        let entry = Self::build_entry(org_id, actor_id, document_type, document_id, changes)?;

        log::debug!(
            "SQL EXECUTE: INSERT INTO document (org_id, document_type, document_id, body, updated_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT DO UPDATE"
        );
        tx.execute(
            "INSERT INTO document (org_id, document_type, document_id, body, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (org_id, document_type, document_id) \
             DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            rusqlite::params![org_id, document_type, document_id, body_text, entry.timestamp],
        )?;
        Self::append_entry(&tx, &entry)?;

        tx.commit()?;
        drop(conn);

        // Notify after commit with the write lock released
        self.notify_audit_subscribers(&entry)?;

        Ok(entry)
    }

    pub fn get_document(
        &self,
        org_id: &str,
        document_type: &str,
        document_id: &str,
    ) -> Result<Option<Value>> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        Self::read_body(&conn, org_id, document_type, document_id)
    }

    pub fn list_documents(
        &self,
        org_id: &str,
        document_type: &str,
    ) -> Result<Vec<(String, Value)>> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;

        let mut stmt = conn.prepare(
            "SELECT document_id, body FROM document \
             WHERE org_id = ? AND document_type = ? \
             ORDER BY document_id ASC",
        )?;
        let mut rows = stmt.query([org_id, document_type])?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let document_id: String = row.get(0)?;
            let body: String = row.get(1)?;
            documents.push((document_id, serde_json::from_str(&body)?));
        }

        Ok(documents)
    }

    /// Removes one document and records the deletion. The recorded change
    /// set carries the per-field removals plus the `_delete` marker entry
    /// that collapses the description to "<type> deleted".
    pub fn delete_document(
        &self,
        org_id: &str,
        actor_id: &str,
        document_type: &str,
        document_id: &str,
    ) -> Result<AuditEntry> {
        validate_identifiers(org_id, actor_id, document_type, document_id)?;

        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        let tx = conn.transaction()?;

        let before = Self::read_body(&tx, org_id, document_type, document_id)?;
        anyhow::ensure!(
            before.is_some(),
            "document {}/{}/{} not found",
            org_id,
            document_type,
            document_id
        );

        log::debug!(
            "SQL EXECUTE: DELETE FROM document WHERE org_id = ? AND document_type = ? AND document_id = ?"
        );
        tx.execute(
            "DELETE FROM document WHERE org_id = ? AND document_type = ? AND document_id = ?",
            rusqlite::params![org_id, document_type, document_id],
        )?;

        let mut changes = compute_diff(before.as_ref(), None);
        changes.entries.push(ChangeEntry {
            field: DELETE_MARKER.to_string(),
            change_type: ChangeType::Added,
            old_value: None,
            new_value: Some(Value::Bool(true)),
        });
        let entry = Self::build_entry(org_id, actor_id, document_type, document_id, changes)?;
        Self::append_entry(&tx, &entry)?;

        tx.commit()?;
        drop(conn);

        self.notify_audit_subscribers(&entry)?;

        Ok(entry)
    }

    fn read_body(
        conn: &rusqlite::Connection,
        org_id: &str,
        document_type: &str,
        document_id: &str,
    ) -> Result<Option<Value>> {
        let mut stmt = conn.prepare(
            "SELECT body FROM document WHERE org_id = ? AND document_type = ? AND document_id = ?",
        )?;
        let mut rows = stmt.query([org_id, document_type, document_id])?;

        if let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&body)?))
        } else {
            Ok(None)
        }
    }
}
