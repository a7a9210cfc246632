//! Storage port: where derivative and original files live.
//!
//! The pipeline only needs existence checks, whole-file reads and writes,
//! and deletes. [`FsStorage`] backs this with the local filesystem; hosts
//! with object storage implement [`Storage`] themselves.

use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

pub trait Storage: Send + Sync + 'static {
    fn exists(&self, path: &Path) -> impl Future<Output = io::Result<bool>> + Send;
    fn read_all(&self, path: &Path) -> impl Future<Output = io::Result<Bytes>> + Send;
    fn write_all(&self, path: &Path, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
    fn delete(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;
}

/// Local filesystem storage.
///
/// Writes land in a temporary sibling file and are renamed into place, so a
/// reader never sees a half-written derivative.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for FsStorage {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn read_all(&self, path: &Path) -> io::Result<Bytes> {
        fs::read(path).await.map(Bytes::from)
    }

    async fn write_all(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "storage path has no parent directory")
        })?;
        fs::create_dir_all(parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::write(&tmp_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(())
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }
}
