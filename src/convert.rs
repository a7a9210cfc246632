//! Derivative encoder: one source in, one stored WebP out.
//!
//! ```text
//! source bytes ──encode (blocking pool)──► webp bytes + final size
//!                                            │
//!              allocate name from final size ┘
//!                                            │
//!              after_conversion observer ────┤
//!              write (unless disabled) ──────┤
//!              after_storage observer ───────┘
//! ```
//!
//! Failures are local: an encode or write failure is logged and the caller
//! gets `None`, so one bad derivative never takes its siblings down.

use crate::imaging::{BackendError, EncodeEngine, ResizeSpec};
use crate::naming::{self, NamingError};
use crate::pipeline::{Observer, Pipeline};
use crate::records::RecordStore;
use crate::storage::Storage;
use crate::types::{DERIVATIVE_MIME_TYPE, DerivativeMetadata, UploadFile};
use bytes::Bytes;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single derivative was skipped.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("encode failed: {0}")]
    Encode(#[from] BackendError),
    #[error("encode task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything known about one produced derivative.
#[derive(Debug, Clone)]
pub struct DerivativeResult {
    /// Name of the source upload.
    pub original_name: String,
    /// Source name without its extension.
    pub base_name: String,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    /// Allocated name without extension.
    pub filename: String,
    /// Allocated name with extension, as persisted.
    pub filename_ext: String,
    pub path: PathBuf,
}

impl DerivativeResult {
    pub fn metadata(&self) -> DerivativeMetadata {
        DerivativeMetadata {
            filename: self.filename_ext.clone(),
            filesize: self.byte_size,
            width: self.width,
            height: self.height,
            mime_type: DERIVATIVE_MIME_TYPE.to_string(),
        }
    }
}

fn notify(observer: Option<&Observer>, result: &DerivativeResult, stage: &str) {
    if let Some(observer) = observer {
        if catch_unwind(AssertUnwindSafe(|| observer(result))).is_err() {
            warn!(stage, file = %result.filename_ext, "derivative observer panicked");
        }
    }
}

impl<S: Storage, R: RecordStore, E: EncodeEngine + 'static> Pipeline<S, R, E> {
    /// Produce one derivative of `file` in `dir`.
    ///
    /// `resize` of `None` re-encodes at the source size. Returns `None` when
    /// the derivative could not be produced; the reason is logged.
    pub async fn convert(
        &self,
        file: &UploadFile,
        dir: &Path,
        resize: Option<ResizeSpec>,
        storage_disabled: bool,
    ) -> Option<DerivativeResult> {
        match self.try_convert(file, dir, resize, storage_disabled).await {
            Ok(result) => Some(result),
            Err(error) => {
                warn!(%error, file = %file.name, ?resize, "derivative skipped");
                None
            }
        }
    }

    pub async fn try_convert(
        &self,
        file: &UploadFile,
        dir: &Path,
        resize: Option<ResizeSpec>,
        storage_disabled: bool,
    ) -> Result<DerivativeResult, ConvertError> {
        let params = self.config.conversion.encode_params(resize);
        let engine = Arc::clone(&self.engine);
        let source = file.data.clone();
        let encoded =
            tokio::task::spawn_blocking(move || engine.encode(&source, &params)).await??;

        let base_name = naming::base_name(&file.name).to_string();
        let allocation = naming::allocate(
            &self.storage,
            dir,
            &base_name,
            (encoded.width, encoded.height),
            self.config.conversion.collision,
        )
        .await?;

        let byte_size = encoded.byte_size();
        let result = DerivativeResult {
            original_name: file.name.clone(),
            base_name,
            data: Bytes::from(encoded.data),
            width: encoded.width,
            height: encoded.height,
            byte_size,
            filename: allocation.filename,
            filename_ext: allocation.filename_ext,
            path: allocation.path,
        };

        notify(self.after_conversion.as_ref(), &result, "after_conversion");

        if !storage_disabled {
            self.storage
                .write_all(&result.path, &result.data)
                .await
                .map_err(|source| ConvertError::Write {
                    path: result.path.clone(),
                    source,
                })?;
            notify(self.after_storage.as_ref(), &result, "after_storage");
        }

        debug!(
            file = %result.filename_ext,
            width = result.width,
            height = result.height,
            bytes = result.byte_size,
            "derivative written"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Fit;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[tokio::test]
    async fn primary_conversion_writes_named_file() {
        let tmp = TempDir::new().unwrap();
        let pipeline = mock_pipeline(tmp.path(), vec![]);
        let dir = tmp.path().join("media");

        let result = pipeline
            .convert(&jpeg_upload("photo.jpg"), &dir, None, false)
            .await
            .unwrap();

        assert_eq!(result.filename_ext, "photo-800x600.webp");
        assert_eq!(result.base_name, "photo");
        assert_eq!(result.byte_size, result.data.len() as u64);
        assert!(dir.join("photo-800x600.webp").exists());

        let meta = result.metadata();
        assert_eq!(meta.mime_type, "image/webp");
        assert_eq!((meta.width, meta.height), (800, 600));
    }

    #[tokio::test]
    async fn name_uses_output_dimensions() {
        let tmp = TempDir::new().unwrap();
        let pipeline = mock_pipeline(tmp.path(), vec![]);
        let resize = ResizeSpec {
            width: Some(100),
            fit: Fit::Inside,
            ..ResizeSpec::default()
        };

        // Mock fills a missing side from the source height
        let result = pipeline
            .convert(&jpeg_upload("a.png"), tmp.path(), Some(resize), false)
            .await
            .unwrap();
        assert_eq!(result.filename_ext, "a-100x600.webp");
    }

    #[tokio::test]
    async fn storage_disabled_skips_write_but_returns_result() {
        let tmp = TempDir::new().unwrap();
        let pipeline = mock_pipeline(tmp.path(), vec![]);

        let result = pipeline
            .convert(&jpeg_upload("photo.jpg"), tmp.path(), None, true)
            .await
            .unwrap();
        assert!(!result.path.exists());
    }

    #[tokio::test]
    async fn encode_failure_yields_none() {
        let tmp = TempDir::new().unwrap();
        let pipeline = pipeline_with_engine(tmp.path(), vec![], MockBackend::new().failing());

        let result = pipeline
            .convert(&jpeg_upload("photo.jpg"), tmp.path(), None, false)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn write_failure_yields_none() {
        let tmp = TempDir::new().unwrap();
        let pipeline = mock_pipeline(tmp.path(), vec![]);
        pipeline.storage().fail_writes(true);

        let err = pipeline
            .try_convert(&jpeg_upload("photo.jpg"), tmp.path(), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Write { .. }));
    }

    #[tokio::test]
    async fn observers_see_result_around_write() {
        let tmp = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        let pipeline = mock_pipeline(tmp.path(), vec![])
            .with_after_conversion(move |r| {
                a.lock()
                    .unwrap()
                    .push(format!("conversion:{}:{}", r.filename_ext, r.path.exists()));
            })
            .with_after_storage(move |r| {
                b.lock()
                    .unwrap()
                    .push(format!("storage:{}:{}", r.filename_ext, r.path.exists()));
            });

        pipeline
            .convert(&jpeg_upload("p.jpg"), tmp.path(), None, false)
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "conversion:p-800x600.webp:false".to_string(),
                "storage:p-800x600.webp:true".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn panicking_observer_does_not_fail_conversion() {
        let tmp = TempDir::new().unwrap();
        let pipeline = mock_pipeline(tmp.path(), vec![]).with_after_storage(|_| panic!("boom"));

        let result = pipeline
            .convert(&jpeg_upload("p.jpg"), tmp.path(), None, false)
            .await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn real_backend_reports_written_dimensions() {
        let tmp = TempDir::new().unwrap();
        let pipeline = real_pipeline(tmp.path(), vec![]);
        let upload = UploadFile {
            data: Bytes::from(jpeg_bytes(120, 80)),
            name: "shot.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
        };
        let resize = ResizeSpec {
            width: Some(60),
            ..ResizeSpec::default()
        };

        let result = pipeline
            .convert(&upload, tmp.path(), Some(resize), false)
            .await
            .unwrap();
        assert_eq!(result.filename_ext, "shot-60x40.webp");

        let written = image::open(&result.path).unwrap();
        assert_eq!((written.width(), written.height()), (60, 40));
    }
}
