//! The document type every Store capability operates on.

use maggma_time::Time;
use serde_json::{Map, Value};

/// A self-describing, nested-map document. One field is designated the key (a unique
/// identifier within a Store) and one is designated the last-updated timestamp; both are
/// plain field names configured on the owning Store, not hardcoded here.
pub type Document = Map<String, Value>;

/// Read a scalar field out of a document as a [`Value`], or `None` if absent.
pub fn get_field<'a>(doc: &'a Document, field: &str) -> Option<&'a Value> {
    doc.get(field)
}

/// Read a document's key field as a string-ish key. Numbers and strings both stringify;
/// any other type (or a missing key field) is an error at the call site, not here.
pub fn get_key_str(doc: &Document, key_field: &str) -> Option<String> {
    match doc.get(key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a document's last-updated field as a [`Time`]. A document with no such field, or
/// one that doesn't parse as RFC 3339, is treated as the epoch sentinel -- older than any
/// timestamped document -- per the Store invariant in the spec.
pub fn get_last_updated(doc: &Document, last_updated_field: &str) -> Time {
    doc.get(last_updated_field)
        .and_then(Value::as_str)
        .and_then(|s| Time::from_rfc3339(s).ok())
        .unwrap_or_else(Time::epoch)
}

/// Set a document's last-updated field to `time`, as an RFC 3339 string.
pub fn set_last_updated(doc: &mut Document, last_updated_field: &str, time: Time) {
    doc.insert(
        last_updated_field.to_string(),
        Value::String(time.to_rfc3339()),
    );
}
