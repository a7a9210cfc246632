//! Record lifecycle hooks.
//!
//! A host adapter calls [`LifecycleHooks::on_record_changed`] after a record
//! is saved and [`LifecycleHooks::on_record_deleted`] after one is removed.
//! The dispatcher owns no state; it only decides what to run and when.
//!
//! In `async` mode the change hook spawns conversion onto the pipeline's
//! task tracker and returns the record untouched. Its `derivative` field
//! becomes correct once the background task updates the record store.

use crate::config::ExecutionMode;
use crate::imaging::EncodeEngine;
use crate::pipeline::Pipeline;
use crate::records::{Record, RecordStore};
use crate::storage::Storage;
use crate::types::{DERIVATIVE_FIELD, UploadFile};
use crate::variants::GenerateError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum HookError {
    #[error("derivative conversion failed: {0}")]
    Conversion(#[from] GenerateError),
    #[error("failed to serialize derivative metadata: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to delete {} derivative file(s): {}", .paths.len(), display_paths(.paths))]
    FileDeletion { paths: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A saved record, with the upload bytes if this save carried a new file.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub collection: String,
    pub record: Record,
    /// `None` for metadata-only edits.
    pub upload: Option<UploadFile>,
}

#[derive(Debug, Clone)]
pub struct RecordDelete {
    pub collection: String,
    pub record: Record,
}

/// Lifecycle callbacks a host adapter invokes.
pub trait LifecycleHooks: Send + Sync {
    /// Returns the record as the caller should see it: with fresh
    /// derivatives in `sync` mode, unchanged otherwise.
    fn on_record_changed(
        &self,
        change: RecordChange,
    ) -> impl Future<Output = Result<Record, HookError>> + Send;

    /// Removes the record's derivative files. Missing files are not errors.
    fn on_record_deleted(
        &self,
        delete: RecordDelete,
    ) -> impl Future<Output = Result<(), HookError>> + Send;
}

pub struct HookDispatcher<S, R, E> {
    pipeline: Arc<Pipeline<S, R, E>>,
}

impl<S, R, E> HookDispatcher<S, R, E> {
    pub fn new(pipeline: Arc<Pipeline<S, R, E>>) -> Self {
        Self { pipeline }
    }
}

impl<S: Storage, R: RecordStore, E: EncodeEngine + 'static> LifecycleHooks
    for HookDispatcher<S, R, E>
{
    async fn on_record_changed(&self, change: RecordChange) -> Result<Record, HookError> {
        let RecordChange {
            collection,
            mut record,
            upload,
        } = change;

        let Some(upload) = upload else {
            return Ok(record);
        };
        let Some(config) = self.pipeline.collection(&collection).cloned() else {
            debug!(%collection, "collection has no derivatives configured");
            return Ok(record);
        };
        if !self.pipeline.config().conversion.accepts(&upload.mime_type) {
            debug!(%collection, mime = %upload.mime_type, "mime type not accepted, skipping");
            return Ok(record);
        }

        match self.pipeline.config().conversion.mode {
            ExecutionMode::Sync => {
                let field = self
                    .pipeline
                    .generate_all(&upload, &config, &record.id)
                    .await?;
                record
                    .fields
                    .insert(DERIVATIVE_FIELD.to_string(), serde_json::to_value(&field)?);
                Ok(record)
            }
            ExecutionMode::Async => {
                let pipeline = Arc::clone(&self.pipeline);
                let id = record.id.clone();
                self.pipeline.spawn(async move {
                    if let Err(error) = pipeline.generate_all(&upload, &config, &id).await {
                        error!(%error, collection = %config.slug, %id, "background conversion failed");
                    }
                });
                Ok(record)
            }
        }
    }

    async fn on_record_deleted(&self, delete: RecordDelete) -> Result<(), HookError> {
        let Some(field) = delete.record.derivative() else {
            return Ok(());
        };
        let Some(config) = self.pipeline.collection(&delete.collection) else {
            return Ok(());
        };
        let dir = self.pipeline.static_dir(config);
        let storage = self.pipeline.storage();

        let mut failed = Vec::new();
        for filename in field.filenames() {
            let path = dir.join(filename);
            match storage.exists(&path).await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(error) => {
                    warn!(%error, path = %path.display(), "could not check derivative");
                    failed.push(path);
                    continue;
                }
            }
            if let Err(error) = storage.delete(&path).await {
                warn!(%error, path = %path.display(), "could not delete derivative");
                failed.push(path);
            }
        }

        if failed.is_empty() {
            info!(collection = %delete.collection, id = %delete.record.id, "derivatives deleted");
            Ok(())
        } else {
            Err(HookError::FileDeletion { paths: failed })
        }
    }
}
