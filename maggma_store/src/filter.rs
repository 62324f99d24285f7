//! Shared in-process filtering/sorting/projection logic for the reference Store adapters.
//! A real document-database adapter would push all of this down to the server; these
//! reference adapters apply it locally since they hold the whole collection in memory or
//! on disk anyway.

use crate::{
    document::Document,
    store::{Criteria, QueryOptions, SortDirection},
};
use serde_json::Value;

/// Does `doc` match every `(field, value)` constraint in `criteria`?
pub fn matches(doc: &Document, criteria: &Criteria) -> bool {
    criteria
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

/// Apply projection, sort, skip, and limit, in that order, to an owned vector of documents.
/// `key_field`/`last_updated_field` are always retained even if the projection omits them.
pub fn apply_options(
    mut docs: Vec<Document>,
    options: &QueryOptions,
    key_field: &str,
    last_updated_field: &str,
) -> Vec<Document> {
    for field in options.sort.iter().rev() {
        docs.sort_by(|a, b| {
            let av = a.get(&field.field);
            let bv = b.get(&field.field);
            let ord = compare_values(av, bv);
            match field.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
    }

    let docs: Vec<Document> = docs.into_iter().skip(options.skip).collect();
    let docs: Vec<Document> = match options.limit {
        Some(limit) => docs.into_iter().take(limit).collect(),
        None => docs,
    };

    match &options.projection {
        None => docs,
        Some(fields) => docs
            .into_iter()
            .map(|doc| project(doc, fields, key_field, last_updated_field))
            .collect(),
    }
}

fn project(
    doc: Document,
    fields: &[String],
    key_field: &str,
    last_updated_field: &str,
) -> Document {
    let mut out = Document::new();
    for field in fields.iter().chain([key_field, last_updated_field].iter()) {
        if let Some(v) = doc.get(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    out
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}
