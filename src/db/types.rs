use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Trait for types that can be read back from database rows
pub trait Entity: Serialize + DeserializeOwned {}

// Blanket implementation for any type that meets the requirements
impl<T> Entity for T where T: Serialize + DeserializeOwned {}

/// Result window cap applied when a filter does not set its own limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Classification of a single field-level difference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One field-level difference between two document snapshots. `None` marks
/// an absent field; `Some(Value::Null)` is a field that was present with an
/// explicit null.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub field: String,
    pub change_type: ChangeType,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// The structured result of diffing two document snapshots. Entries are
/// ordered with the after-snapshot's fields first (natural key order), then
/// fields that only existed in the before snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One immutable row of the append-only audit log. Never updated or deleted
/// once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub org_id: String,
    pub actor_id: String,
    pub document_type: String,
    pub document_id: String,
    /// JSON-encoded [`ChangeSet`], stored as written. Use
    /// [`AuditEntry::change_set`] for the typed view.
    pub changes: String,
    pub description: String,
    /// Milliseconds since the Unix epoch, assigned at append time.
    pub timestamp: i64,
}

impl AuditEntry {
    pub fn change_set(&self) -> anyhow::Result<ChangeSet> {
        Ok(serde_json::from_str(&self.changes)?)
    }
}

/// Filter shared by pull queries, push subscriptions, and export call sites.
/// `org_id` is required; everything else narrows the window.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub org_id: String,
    pub actor_id: Option<String>,
    pub document_type: Option<String>,
    pub document_id: Option<String>,
    /// Inclusive lower bound, milliseconds since the Unix epoch.
    pub since: Option<i64>,
    /// Inclusive upper bound, milliseconds since the Unix epoch.
    pub until: Option<i64>,
    /// Result window cap; defaults to [`DEFAULT_QUERY_LIMIT`].
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            ..Default::default()
        }
    }

    /// Whether a freshly appended entry falls inside this filter's window.
    /// Drives which subscriptions get re-queried after an append.
    pub(crate) fn matches(&self, entry: &AuditEntry) -> bool {
        if entry.org_id != self.org_id {
            return false;
        }
        if let Some(actor_id) = &self.actor_id {
            if &entry.actor_id != actor_id {
                return false;
            }
        }
        if let Some(document_type) = &self.document_type {
            if &entry.document_type != document_type {
                return false;
            }
        }
        if let Some(document_id) = &self.document_id {
            if &entry.document_id != document_id {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}
