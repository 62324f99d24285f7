//! A newline-delimited-JSON on-disk reference [`Store`] implementation. Supplements
//! [`crate::memory::InMemoryStore`] with the "file" adapter the size budget calls for,
//! useful for Builders that need a target surviving process restarts without a real
//! document database.

use crate::{
    error::{ConnectSnafu, QuerySnafu, Result, WriteSnafu},
    memory::InMemoryStore,
    store::{Criteria, DocumentStream, QueryOptions, Store},
    Document,
};
use async_trait::async_trait;
use maggma_time::Time;
use serde_json::Value;
use snafu::ResultExt;
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt};

/// A [`Store`] whose documents live in a newline-delimited-JSON file on disk. Reads the
/// whole file into an in-memory index on `connect` and rewrites it on every mutation;
/// fine for the small-to-moderate document counts this reference adapter is meant for.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: InMemoryStore,
}

impl FileStore {
    /// Create a handle to a (possibly not-yet-existing) NDJSON file.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, key_field: impl Into<String>) -> Self {
        let name = name.into();
        let key_field = key_field.into();
        Self {
            path: path.into(),
            inner: InMemoryStore::new(name, key_field),
        }
    }

    async fn flush(&self) -> Result<()> {
        let mut buf = String::new();
        for doc in self.inner.all_docs() {
            buf.push_str(&serde_json::to_string(&doc).expect("Document always serializes"));
            buf.push('\n');
        }
        let mut file = fs::File::create(&self.path)
            .await
            .with_context(|| WriteSnafu {
                name: self.inner.name().to_string(),
            })?;
        file.write_all(buf.as_bytes())
            .await
            .with_context(|| WriteSnafu {
                name: self.inner.name().to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn key_field(&self) -> &str {
        self.inner.key_field()
    }

    fn last_updated_field(&self) -> &str {
        self.inner.last_updated_field()
    }

    async fn connect(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| ConnectSnafu {
                name: self.inner.name().to_string(),
            })?;
        let docs: Result<Vec<Document>, _> = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect();
        let docs = docs.with_context(|| QuerySnafu {
            name: self.inner.name().to_string(),
        })?;
        self.inner.seed(docs);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }

    fn query<'a>(&'a self, criteria: &Criteria, options: &QueryOptions) -> DocumentStream<'a> {
        self.inner.query(criteria, options)
    }

    async fn query_one(&self, criteria: &Criteria) -> Result<Option<Document>> {
        self.inner.query_one(criteria).await
    }

    async fn count(&self, criteria: &Criteria) -> Result<usize> {
        self.inner.count(criteria).await
    }

    async fn distinct(&self, field: &str, criteria: &Criteria) -> Result<Vec<Value>> {
        self.inner.distinct(field, criteria).await
    }

    async fn groupby(
        &self,
        fields: &[String],
        criteria: &Criteria,
    ) -> Result<Vec<(Vec<Value>, Vec<Document>)>> {
        self.inner.groupby(fields, criteria).await
    }

    async fn update(&self, docs: Vec<Document>, key_fields: &[String]) -> Result<()> {
        self.inner.update(docs, key_fields).await?;
        self.flush().await
    }

    async fn remove_docs(&self, criteria: &Criteria) -> Result<()> {
        self.inner.remove_docs(criteria).await?;
        self.flush().await
    }

    async fn ensure_index(&self, field: &str, unique: bool) -> Result<()> {
        self.inner.ensure_index(field, unique).await
    }

    async fn last_updated(&self) -> Result<Time> {
        self.inner.last_updated().await
    }

    async fn newer_in(
        &self,
        other: &(dyn Store + Send + Sync),
        criteria: &Criteria,
        exhaustive: bool,
    ) -> Result<Vec<String>> {
        self.inner.newer_in(other, criteria, exhaustive).await
    }
}
