use std::io::Write;

use anyhow::Result;
use chrono::DateTime;

use super::diff::DELETE_MARKER;
use super::types::{AuditEntry, ChangeType};

/// Renders already-fetched audit entries as CSV. Pure formatting: fetch the
/// window with [`crate::Db::query_audit`] first. Columns are timestamp
/// (RFC 3339), actor, action (create/update/delete), document type, document
/// id, and the JSON-encoded change detail.
pub fn export_audit_csv<W: Write>(entries: &[AuditEntry], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "timestamp",
        "actor",
        "action",
        "document_type",
        "document_id",
        "detail",
    ])?;

    for entry in entries {
        csv_writer.write_record([
            format_timestamp(entry.timestamp).as_str(),
            entry.actor_id.as_str(),
            action_label(entry)?,
            entry.document_type.as_str(),
            entry.document_id.as_str(),
            entry.changes.as_str(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

fn action_label(entry: &AuditEntry) -> Result<&'static str> {
    let changes = entry.change_set()?;
    if changes.entries.iter().any(|e| e.field == DELETE_MARKER) {
        return Ok("delete");
    }
    // An empty set or all-added fields both mean the document appeared
    if changes
        .entries
        .iter()
        .all(|e| e.change_type == ChangeType::Added)
    {
        return Ok("create");
    }
    Ok("update")
}
