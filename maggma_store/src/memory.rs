//! An in-memory reference [`Store`] implementation, the simplest possible adapter and the
//! one used throughout this workspace's own test suite as both source and target.

use crate::{
    document::{get_key_str, get_last_updated},
    error::{MissingKeySnafu, Result},
    filter::{apply_options, matches},
    store::{Criteria, DocumentStream, QueryOptions, Store},
    Document,
};
use async_trait::async_trait;
use futures::stream;
use maggma_time::Time;
use parking_lot::RwLock;
use serde_json::Value;
use snafu::OptionExt;
use std::{collections::BTreeMap, sync::Arc};

/// A [`Store`] backed by a `BTreeMap` keyed on the configured key field, guarded by an
/// `RwLock` so concurrent producer/consumer access (the only two roles ever touching a
/// Store per the spec's ownership rule) doesn't need an `async` lock.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    name: String,
    key_field: String,
    last_updated_field: String,
    docs: Arc<RwLock<BTreeMap<String, Document>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self::with_last_updated_field(name, key_field, "last_updated")
    }

    /// Create an empty store with a non-default last-updated field name.
    pub fn with_last_updated_field(
        name: impl Into<String>,
        key_field: impl Into<String>,
        last_updated_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key_field: key_field.into(),
            last_updated_field: last_updated_field.into(),
            docs: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Seed the store with documents, bypassing `update`'s key-presence check. Handy in
    /// tests that want to set up an initial target state.
    pub fn seed(&self, docs: impl IntoIterator<Item = Document>) {
        let mut guard = self.docs.write();
        for doc in docs {
            if let Some(key) = get_key_str(&doc, &self.key_field) {
                guard.insert(key, doc);
            }
        }
    }

    /// Snapshot every document currently held, for assertions in tests.
    pub fn all_docs(&self) -> Vec<Document> {
        self.docs.read().values().cloned().collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_field(&self) -> &str {
        &self.key_field
    }

    fn last_updated_field(&self) -> &str {
        &self.last_updated_field
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn query<'a>(&'a self, criteria: &Criteria, options: &QueryOptions) -> DocumentStream<'a> {
        let matching: Vec<Document> = self
            .docs
            .read()
            .values()
            .filter(|d| matches(d, criteria))
            .cloned()
            .collect();
        let out = apply_options(matching, options, &self.key_field, &self.last_updated_field);
        Box::pin(stream::iter(out.into_iter().map(Ok)))
    }

    async fn query_one(&self, criteria: &Criteria) -> Result<Option<Document>> {
        Ok(self
            .docs
            .read()
            .values()
            .find(|d| matches(d, criteria))
            .cloned())
    }

    async fn count(&self, criteria: &Criteria) -> Result<usize> {
        Ok(self
            .docs
            .read()
            .values()
            .filter(|d| matches(d, criteria))
            .count())
    }

    async fn distinct(&self, field: &str, criteria: &Criteria) -> Result<Vec<Value>> {
        let mut seen = Vec::new();
        for doc in self.docs.read().values().filter(|d| matches(d, criteria)) {
            if let Some(v) = doc.get(field) {
                if !seen.contains(v) {
                    seen.push(v.clone());
                }
            }
        }
        Ok(seen)
    }

    async fn groupby(
        &self,
        fields: &[String],
        criteria: &Criteria,
    ) -> Result<Vec<(Vec<Value>, Vec<Document>)>> {
        let mut groups: Vec<(Vec<Value>, Vec<Document>)> = Vec::new();
        for doc in self.docs.read().values().filter(|d| matches(d, criteria)) {
            let key: Vec<Value> = fields
                .iter()
                .map(|f| doc.get(f).cloned().unwrap_or(Value::Null))
                .collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(doc.clone()),
                None => groups.push((key, vec![doc.clone()])),
            }
        }
        Ok(groups)
    }

    async fn update(&self, docs: Vec<Document>, key_fields: &[String]) -> Result<()> {
        let key_field = key_fields.first().map(String::as_str).unwrap_or(&self.key_field);
        let mut guard = self.docs.write();
        for doc in docs {
            let key = get_key_str(&doc, key_field).context(MissingKeySnafu {
                key_field: key_field.to_string(),
            })?;
            guard.insert(key, doc);
        }
        Ok(())
    }

    async fn remove_docs(&self, criteria: &Criteria) -> Result<()> {
        self.docs.write().retain(|_, d| !matches(d, criteria));
        Ok(())
    }

    async fn ensure_index(&self, _field: &str, _unique: bool) -> Result<()> {
        Ok(())
    }

    async fn last_updated(&self) -> Result<Time> {
        Ok(self
            .docs
            .read()
            .values()
            .map(|d| get_last_updated(d, &self.last_updated_field))
            .max()
            .unwrap_or_else(Time::epoch))
    }

    async fn newer_in(
        &self,
        other: &(dyn Store + Send + Sync),
        criteria: &Criteria,
        exhaustive: bool,
    ) -> Result<Vec<String>> {
        let others_last_updated = other.last_updated().await?;
        let mine: Vec<Document> = self
            .docs
            .read()
            .values()
            .filter(|d| matches(d, criteria))
            .cloned()
            .collect();

        if !exhaustive {
            return Ok(mine
                .iter()
                .filter(|d| get_last_updated(d, &self.last_updated_field) > others_last_updated)
                .filter_map(|d| get_key_str(d, &self.key_field))
                .collect());
        }

        let mut out = Vec::new();
        for doc in &mine {
            let Some(key) = get_key_str(doc, &self.key_field) else {
                continue;
            };
            let mut key_criteria = Criteria::new();
            key_criteria.insert(other.key_field().to_string(), doc[&self.key_field].clone());
            let their_doc = other.query_one(&key_criteria).await?;
            let mine_ts = get_last_updated(doc, &self.last_updated_field);
            let newer = match their_doc {
                None => true,
                Some(theirs) => mine_ts > get_last_updated(&theirs, other.last_updated_field()),
            };
            if newer {
                out.push(key);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn update_is_upsert() {
        let store = InMemoryStore::new("s", "name");
        store
            .update(vec![doc(json!({"name": "a", "v": 1}))], &[])
            .await
            .unwrap();
        store
            .update(vec![doc(json!({"name": "a", "v": 2}))], &[])
            .await
            .unwrap();
        assert_eq!(store.all_docs().len(), 1);
        assert_eq!(store.all_docs()[0]["v"], json!(2));
    }

    #[tokio::test]
    async fn newer_in_shortcut_is_superset_of_exhaustive() {
        let source = InMemoryStore::new("source", "name");
        let target = InMemoryStore::new("target", "name");

        source
            .update(
                vec![
                    doc(json!({"name": "a", "last_updated": "2026-01-02T00:00:00Z"})),
                    doc(json!({"name": "b", "last_updated": "2026-01-01T00:00:00Z"})),
                ],
                &[],
            )
            .await
            .unwrap();
        target
            .update(
                vec![doc(json!({"name": "a", "last_updated": "2026-01-01T00:00:00Z"}))],
                &[],
            )
            .await
            .unwrap();

        let shortcut = source
            .newer_in(&target, &Criteria::new(), false)
            .await
            .unwrap();
        let exhaustive = source
            .newer_in(&target, &Criteria::new(), true)
            .await
            .unwrap();

        for key in &exhaustive {
            assert!(shortcut.contains(key));
        }
    }

    #[tokio::test]
    async fn remove_docs_deletes_matching() {
        let store = InMemoryStore::new("s", "name");
        store
            .update(
                vec![
                    doc(json!({"name": "a"})),
                    doc(json!({"name": "b"})),
                ],
                &[],
            )
            .await
            .unwrap();
        let mut criteria = Criteria::new();
        criteria.insert("name".into(), json!("a"));
        store.remove_docs(&criteria).await.unwrap();
        assert_eq!(store.all_docs().len(), 1);
        assert_eq!(store.all_docs()[0]["name"], json!("b"));
    }
}
