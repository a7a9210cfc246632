//! Derivative filename allocation.
//!
//! Every derivative is named after its source plus its final pixel size:
//!
//! - `photo.jpg` at 800x600 → `photo-800x600.webp`
//! - a second `photo` at 800x600 → `photo-800x600-1.webp` (suffix-increment)
//!
//! The dimensions are those of the encoded output, not the requested box,
//! so aspect-preserving fits name files by what was actually written.
//!
//! ## Collision policies
//!
//! - **suffix-increment**: probe `-1`, `-2`, … until a free name is found.
//! - **overwrite**: evict the existing file and reuse the name.

use crate::config::CollisionPolicy;
use crate::storage::Storage;
use crate::types::DERIVATIVE_EXTENSION;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum NamingError {
    #[error("Failed to probe {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No free filename for {base} at {width}x{height}")]
    Exhausted { base: String, width: u32, height: u32 },
    #[error("No free filename for original {name}")]
    OriginalExhausted { name: String },
}

/// A storage slot reserved for one derivative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Name without extension, e.g. `photo-100x100-1`.
    pub filename: String,
    /// Name with extension, as persisted in metadata.
    pub filename_ext: String,
    pub path: PathBuf,
}

/// Strip the last extension segment from an uploaded filename.
///
/// - `"photo.jpg"` → `"photo"`
/// - `"archive.tar.gz"` → `"archive.tar"`
/// - `".hidden"` → `".hidden"` (a leading dot is not an extension)
/// - `"README"` → `"README"`
pub fn base_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(pos) => &name[..pos],
    }
}

/// Candidate name for a given probe attempt. Attempt 0 carries no suffix.
pub fn candidate(base: &str, width: u32, height: u32, attempt: u32) -> String {
    if attempt == 0 {
        format!("{base}-{width}x{height}")
    } else {
        format!("{base}-{width}x{height}-{attempt}")
    }
}

/// Find a storage path for a derivative of `base` with the given output size.
///
/// Existence is always checked before a name is returned. Under
/// [`CollisionPolicy::Overwrite`] the existing file is deleted; a failed
/// delete is logged and the name is still returned, since the write that
/// follows replaces the file anyway.
pub async fn allocate<S: Storage>(
    storage: &S,
    dir: &Path,
    base: &str,
    (width, height): (u32, u32),
    policy: CollisionPolicy,
) -> Result<Allocation, NamingError> {
    for attempt in 0..=u32::MAX {
        let filename = candidate(base, width, height, attempt);
        let filename_ext = format!("{filename}.{DERIVATIVE_EXTENSION}");
        let path = dir.join(&filename_ext);

        let exists = storage
            .exists(&path)
            .await
            .map_err(|source| NamingError::Probe {
                path: path.clone(),
                source,
            })?;

        let allocation = Allocation {
            filename,
            filename_ext,
            path,
        };
        if !exists {
            return Ok(allocation);
        }

        match policy {
            CollisionPolicy::Overwrite => {
                debug!(path = %allocation.path.display(), "evicting existing derivative");
                if let Err(error) = storage.delete(&allocation.path).await {
                    warn!(%error, path = %allocation.path.display(), "failed to evict existing derivative");
                }
                return Ok(allocation);
            }
            CollisionPolicy::SuffixIncrement => continue,
        }
    }

    Err(NamingError::Exhausted {
        base: base.to_string(),
        width,
        height,
    })
}

/// Free name for an uploaded original in `dir`: `photo.jpg`, then
/// `photo-1.jpg`, `photo-2.jpg`, …
pub async fn original_name<S: Storage>(
    storage: &S,
    dir: &Path,
    name: &str,
) -> Result<String, NamingError> {
    let base = base_name(name);
    let ext = &name[base.len()..];
    for attempt in 0..=u32::MAX {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            format!("{base}-{attempt}{ext}")
        };
        let path = dir.join(&candidate);
        let exists = storage
            .exists(&path)
            .await
            .map_err(|source| NamingError::Probe { path, source })?;
        if !exists {
            return Ok(candidate);
        }
    }

    Err(NamingError::OriginalExhausted {
        name: name.to_string(),
    })
}

/// Public URL of a stored file.
///
/// `static_url` defaults to `/{slug}` when the collection does not set one.
pub fn public_url(server_url: &str, static_url: &str, filename: &str) -> String {
    let server = server_url.trim_end_matches('/');
    let prefix = static_url.trim_end_matches('/');
    let prefix = if prefix.is_empty() || prefix.starts_with('/') || prefix.contains("://") {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    };
    if prefix.contains("://") {
        format!("{prefix}/{filename}")
    } else {
        format!("{server}{prefix}/{filename}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStorage;
    use tempfile::TempDir;

    #[test]
    fn base_name_strips_last_extension() {
        assert_eq!(base_name("photo.jpg"), "photo");
        assert_eq!(base_name("archive.tar.gz"), "archive.tar");
        assert_eq!(base_name("README"), "README");
        assert_eq!(base_name(".hidden"), ".hidden");
    }

    #[test]
    fn candidate_suffix_only_after_first_attempt() {
        assert_eq!(candidate("a", 200, 200, 0), "a-200x200");
        assert_eq!(candidate("a", 200, 200, 1), "a-200x200-1");
        assert_eq!(candidate("a", 20, 10, 12), "a-20x10-12");
    }

    #[tokio::test]
    async fn free_name_is_returned_immediately() {
        let tmp = TempDir::new().unwrap();
        let alloc = allocate(
            &FsStorage,
            tmp.path(),
            "a",
            (200, 200),
            CollisionPolicy::SuffixIncrement,
        )
        .await
        .unwrap();
        assert_eq!(alloc.filename, "a-200x200");
        assert_eq!(alloc.filename_ext, "a-200x200.webp");
        assert_eq!(alloc.path, tmp.path().join("a-200x200.webp"));
    }

    #[tokio::test]
    async fn suffix_increment_skips_taken_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a-200x200.webp"), b"x").unwrap();

        let alloc = allocate(
            &FsStorage,
            tmp.path(),
            "a",
            (200, 200),
            CollisionPolicy::SuffixIncrement,
        )
        .await
        .unwrap();
        assert_eq!(alloc.filename_ext, "a-200x200-1.webp");

        std::fs::write(&alloc.path, b"x").unwrap();
        let next = allocate(
            &FsStorage,
            tmp.path(),
            "a",
            (200, 200),
            CollisionPolicy::SuffixIncrement,
        )
        .await
        .unwrap();
        assert_eq!(next.filename_ext, "a-200x200-2.webp");
    }

    #[tokio::test]
    async fn overwrite_evicts_existing_file() {
        let tmp = TempDir::new().unwrap();
        let existing = tmp.path().join("a-200x200.webp");
        std::fs::write(&existing, b"x").unwrap();

        let alloc = allocate(
            &FsStorage,
            tmp.path(),
            "a",
            (200, 200),
            CollisionPolicy::Overwrite,
        )
        .await
        .unwrap();
        assert_eq!(alloc.path, existing);
        assert!(!existing.exists());
    }

    #[tokio::test]
    async fn original_name_keeps_extension_when_suffixing() {
        let tmp = TempDir::new().unwrap();
        let name = original_name(&FsStorage, tmp.path(), "photo.jpg").await.unwrap();
        assert_eq!(name, "photo.jpg");

        std::fs::write(tmp.path().join("photo.jpg"), b"x").unwrap();
        std::fs::write(tmp.path().join("photo-1.jpg"), b"x").unwrap();
        let name = original_name(&FsStorage, tmp.path(), "photo.jpg").await.unwrap();
        assert_eq!(name, "photo-2.jpg");

        std::fs::write(tmp.path().join("README"), b"x").unwrap();
        let name = original_name(&FsStorage, tmp.path(), "README").await.unwrap();
        assert_eq!(name, "README-1");
    }

    #[test]
    fn public_url_joins_parts() {
        assert_eq!(
            public_url("https://cms.example", "/media", "a.webp"),
            "https://cms.example/media/a.webp"
        );
        assert_eq!(
            public_url("https://cms.example/", "media/", "a.webp"),
            "https://cms.example/media/a.webp"
        );
        assert_eq!(public_url("", "/media", "a.webp"), "/media/a.webp");
    }

    #[test]
    fn public_url_with_absolute_static_url_ignores_server() {
        assert_eq!(
            public_url("https://cms.example", "https://cdn.example/m", "a.webp"),
            "https://cdn.example/m/a.webp"
        );
    }
}
