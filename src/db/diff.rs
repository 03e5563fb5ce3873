use serde_json::{Map, Value};

use super::types::{ChangeEntry, ChangeSet, ChangeType};

/// Field name that marks a whole-document deletion in a change set. A change
/// set containing this field always describes as "<label> deleted",
/// suppressing every other clause. Kept for compatibility with history
/// strings the original application already displayed.
pub const DELETE_MARKER: &str = "_delete";

/// Computes the field-level differences between two document snapshots.
///
/// `None` models a document that did not exist (create when `before` is
/// `None`, delete when `after` is `None`). Non-object values are treated as
/// empty mappings, so the function is total and never fails.
///
/// Fields compare by canonical JSON serialization, not by reference: two
/// values that serialize identically are unchanged even if they are distinct
/// nested structures. Nested objects and arrays compare as opaque blobs with
/// no per-subfield recursion, and array order is significant. A field whose
/// presence changes is always reported, even when the appearing value is
/// falsy (`0`, `false`, `""`).
pub fn compute_diff(before: Option<&Value>, after: Option<&Value>) -> ChangeSet {
    let empty = Map::new();
    let before_fields = before.and_then(Value::as_object).unwrap_or(&empty);
    let after_fields = after.and_then(Value::as_object).unwrap_or(&empty);

    let mut entries = Vec::new();

    // After-snapshot fields first, in natural key order
    for (field, new_value) in after_fields {
        match before_fields.get(field) {
            None => entries.push(ChangeEntry {
                field: field.clone(),
                change_type: ChangeType::Added,
                old_value: None,
                new_value: Some(new_value.clone()),
            }),
            Some(old_value) => {
                if !same_serialized(old_value, new_value) {
                    entries.push(ChangeEntry {
                        field: field.clone(),
                        change_type: ChangeType::Modified,
                        old_value: Some(old_value.clone()),
                        new_value: Some(new_value.clone()),
                    });
                }
            }
        }
    }

    // Then fields that only existed before
    for (field, old_value) in before_fields {
        if !after_fields.contains_key(field) {
            entries.push(ChangeEntry {
                field: field.clone(),
                change_type: ChangeType::Removed,
                old_value: Some(old_value.clone()),
                new_value: None,
            });
        }
    }

    ChangeSet { entries }
}

fn same_serialized(a: &Value, b: &Value) -> bool {
    // serde_json maps are BTreeMap-backed, so to_string is a stable,
    // sorted-key canonical encoding
    a.to_string() == b.to_string()
}

/// Renders a change set into the one-line description stored alongside it.
///
/// An empty change set describes as `"<label> created"`; a set containing
/// the [`DELETE_MARKER`] field short-circuits to `"<label> deleted"`.
/// Otherwise one clause per entry, joined with `", "`:
///
/// - added: `field set to "value"`
/// - modified: `field changed from "old" to "new"`
/// - removed: `field removed (was "old")`
pub fn describe_change_set(label: &str, changes: &ChangeSet) -> String {
    if changes.entries.iter().any(|e| e.field == DELETE_MARKER) {
        return format!("{} deleted", label);
    }
    if changes.entries.is_empty() {
        return format!("{} created", label);
    }

    let clauses: Vec<String> = changes
        .entries
        .iter()
        .map(|entry| match entry.change_type {
            ChangeType::Added => format!(
                "{} set to \"{}\"",
                entry.field,
                render_value(entry.new_value.as_ref())
            ),
            ChangeType::Modified => format!(
                "{} changed from \"{}\" to \"{}\"",
                entry.field,
                render_value(entry.old_value.as_ref()),
                render_value(entry.new_value.as_ref())
            ),
            ChangeType::Removed => format!(
                "{} removed (was \"{}\")",
                entry.field,
                render_value(entry.old_value.as_ref())
            ),
        })
        .collect();

    clauses.join(", ")
}

/// Natural string conversion: strings render bare, everything else as its
/// JSON text.
fn render_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
