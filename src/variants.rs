//! Variant orchestration: the primary derivative plus every configured size.
//!
//! Conversions run one after another so only one derivative's bytes are held
//! at a time. The primary always finishes first; if it fails nothing is
//! recorded, because size variants without a primary would be orphans.
//! A failed size is logged and left out of the `sizes` map.

use crate::config::CollectionConfig;
use crate::imaging::EncodeEngine;
use crate::pipeline::Pipeline;
use crate::records::{Record, RecordError, RecordStore};
use crate::storage::Storage;
use crate::types::{DERIVATIVE_FIELD, DerivativeField, UploadFile};
use serde_json::Map;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("primary derivative of {name} could not be produced")]
    PrimaryFailed { name: String },
    #[error("failed to store derivative metadata: {0}")]
    RecordUpdate(#[source] RecordError),
    #[error("failed to serialize derivative metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl<S: Storage, R: RecordStore, E: EncodeEngine + 'static> Pipeline<S, R, E> {
    /// Convert `file` into every derivative of `collection` and store the
    /// result on record `id`.
    ///
    /// Files already written stay on disk if the record update fails.
    pub async fn generate_all(
        &self,
        file: &UploadFile,
        collection: &CollectionConfig,
        id: &str,
    ) -> Result<DerivativeField, GenerateError> {
        let dir = self.static_dir(collection);
        let disabled = collection.disable_local_storage;

        let primary = self
            .convert(file, &dir, self.config.conversion.max_resize, disabled)
            .await
            .ok_or_else(|| GenerateError::PrimaryFailed {
                name: file.name.clone(),
            })?;

        let mut sizes = BTreeMap::new();
        for size in &collection.sizes {
            let resize = self.resize_for(size);
            match self.convert(file, &dir, Some(resize), disabled).await {
                Some(result) => {
                    sizes.insert(size.name.clone(), result.metadata());
                }
                None => warn!(size = %size.name, file = %file.name, "size variant skipped"),
            }
        }

        let field = DerivativeField {
            primary: primary.metadata(),
            sizes,
        };

        let mut partial = Map::new();
        partial.insert(DERIVATIVE_FIELD.to_string(), serde_json::to_value(&field)?);
        self.records
            .update_by_id(&collection.slug, id, partial)
            .await
            .map_err(GenerateError::RecordUpdate)?;

        info!(
            collection = %collection.slug,
            %id,
            file = %field.primary.filename,
            sizes = field.sizes.len(),
            "derivatives stored"
        );
        Ok(field)
    }

    /// Re-derive a stored record from its original file.
    ///
    /// Returns `Ok(false)` when the record has no filename or the original
    /// cannot be read; those records are skipped, not failed.
    pub async fn regenerate_from_original(
        &self,
        collection: &CollectionConfig,
        record: &Record,
    ) -> Result<bool, GenerateError> {
        let Some(filename) = record.filename() else {
            warn!(collection = %collection.slug, id = %record.id, "record has no filename");
            return Ok(false);
        };

        let path = self.static_dir(collection).join(filename);
        let data = match self.storage.read_all(&path).await {
            Ok(data) => data,
            Err(error) => {
                warn!(%error, path = %path.display(), "original unreadable, skipping");
                return Ok(false);
            }
        };

        let file = UploadFile {
            data,
            name: filename.to_string(),
            mime_type: record.mime_type().unwrap_or_default().to_string(),
        };
        debug!(collection = %collection.slug, id = %record.id, %filename, "regenerating");
        self.generate_all(&file, collection, &record.id).await?;
        Ok(true)
    }
}
