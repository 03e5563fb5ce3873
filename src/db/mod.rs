pub mod audit;
pub mod core;
pub mod diff;
pub mod documents;
pub mod export;
pub mod reactive;
pub mod types;

pub use self::core::Db;
pub use self::diff::{compute_diff, describe_change_set};
pub use self::export::export_audit_csv;
pub use self::reactive::{AuditObserver, AuditSubscriber};
pub use self::types::*;
