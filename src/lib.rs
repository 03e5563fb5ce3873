pub mod db;
pub mod notifier;

pub use db::{compute_diff, describe_change_set, export_audit_csv};
pub use db::{AuditEntry, AuditFilter, ChangeEntry, ChangeSet, ChangeType, Db};
pub use rusqlite;
