//! Record store port and a JSON-file adapter.
//!
//! Records are generic documents: an `id` plus whatever fields the host
//! keeps. The pipeline reads `filename` and `mimeType` and writes the
//! `derivative` field group; everything else passes through untouched.
//!
//! [`JsonRecordStore`] keeps one JSON array per collection under a data
//! directory (`<dir>/<collection>.json`). It is what the CLI uses when it
//! acts as the host.

use crate::types::{DERIVATIVE_FIELD, DerivativeField};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Record {id} not found in collection {collection}")]
    NotFound { collection: String, id: String },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed record file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Stored filename of the original upload.
    pub fn filename(&self) -> Option<&str> {
        self.str_field("filename")
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.str_field("mimeType")
    }

    /// Parsed derivative field group, if the record has a well-formed one.
    pub fn derivative(&self) -> Option<DerivativeField> {
        let value = self.fields.get(DERIVATIVE_FIELD)?;
        if value.is_null() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Shallow merge: top-level keys in `partial` replace existing ones.
    pub fn merge(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            if key != "id" {
                self.fields.insert(key, value);
            }
        }
    }
}

/// Page request. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub page: u64,
    pub limit: u64,
    /// Field to sort by; a leading `-` sorts descending.
    pub sort: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub page: u64,
    pub total_pages: u64,
    pub total_docs: u64,
}

pub trait RecordStore: Send + Sync + 'static {
    fn find_page(
        &self,
        collection: &str,
        query: &PageQuery,
    ) -> impl Future<Output = Result<Page, RecordError>> + Send;

    fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Record, RecordError>> + Send;

    /// Merge `partial` into the record's top-level fields and return the result.
    fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> impl Future<Output = Result<Record, RecordError>> + Send;
}

// ============================================================================
// Sorting
// ============================================================================

/// Order two field values: numbers numerically, strings lexically, and
/// missing or mismatched values after everything else.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(v), None) if !v.is_null() => Ordering::Less,
        (None, Some(v)) if !v.is_null() => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn field_of<'a>(record: &'a Record, key: &str) -> Option<&'a Value> {
    if key == "id" {
        None
    } else {
        record.fields.get(key)
    }
}

/// Stable sort by a field, `-field` for descending. `id` sorts by the id string.
pub fn sort_records(records: &mut [Record], sort: &str) {
    let (key, descending) = match sort.strip_prefix('-') {
        Some(key) => (key, true),
        None => (sort, false),
    };
    if key.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        let ord = if key == "id" {
            a.id.cmp(&b.id)
        } else {
            compare_values(field_of(a, key), field_of(b, key))
        };
        if descending { ord.reverse() } else { ord }
    });
}

/// Cut one page out of an already sorted list.
pub fn paginate(records: Vec<Record>, page: u64, limit: u64) -> Page {
    let total_docs = records.len() as u64;
    let page = page.max(1);
    let total_pages = if limit == 0 {
        0
    } else {
        total_docs.div_ceil(limit)
    };
    let skip = (page - 1).saturating_mul(limit) as usize;
    let records = records
        .into_iter()
        .skip(skip)
        .take(limit as usize)
        .collect();
    Page {
        records,
        page,
        total_pages,
        total_docs,
    }
}

// ============================================================================
// JSON file adapter
// ============================================================================

/// Record store backed by one JSON array per collection.
///
/// All access is serialized through a single lock; the files are small and
/// the CLI is the only writer.
#[derive(Debug)]
pub struct JsonRecordStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    async fn load(&self, collection: &str) -> Result<Vec<Record>, RecordError> {
        let path = self.collection_path(collection);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(RecordError::Io { path, source }),
        };
        serde_json::from_slice(&content).map_err(|source| RecordError::Json { path, source })
    }

    async fn save(&self, collection: &str, records: &[Record]) -> Result<(), RecordError> {
        let path = self.collection_path(collection);
        let json = serde_json::to_vec_pretty(records).map_err(|source| RecordError::Json {
            path: path.clone(),
            source,
        })?;
        let io_err = |source| RecordError::Io {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let tmp_path = self.dir.join(format!(".tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, json).await.map_err(io_err)?;
        if let Err(source) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_err(source));
        }
        Ok(())
    }

    /// Insert a new record with a fresh id and `createdAt` timestamp.
    pub async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, RecordError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load(collection).await?;

        let mut record = Record {
            id: Uuid::new_v4().to_string(),
            fields,
        };
        record
            .fields
            .entry("createdAt")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        records.push(record.clone());

        self.save(collection, &records).await?;
        Ok(record)
    }

    /// Remove a record and return it.
    pub async fn delete_by_id(&self, collection: &str, id: &str) -> Result<Record, RecordError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load(collection).await?;
        let pos = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RecordError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let removed = records.remove(pos);
        self.save(collection, &records).await?;
        Ok(removed)
    }
}

impl RecordStore for JsonRecordStore {
    async fn find_page(&self, collection: &str, query: &PageQuery) -> Result<Page, RecordError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load(collection).await?;
        sort_records(&mut records, &query.sort);
        Ok(paginate(records, query.page, query.limit))
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Record, RecordError> {
        let _guard = self.lock.lock().await;
        self.load(collection)
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RecordError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<Record, RecordError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load(collection).await?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RecordError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        record.merge(partial);
        let updated = record.clone();
        self.save(collection, &records).await?;
        Ok(updated)
    }
}
