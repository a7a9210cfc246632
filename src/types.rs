//! Shared types used across the derivative pipeline.
//!
//! [`DerivativeField`] is the shape persisted onto every converted record,
//! so its serde representation is a storage format: field names are
//! camelCase and must stay stable.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// MIME type of every derivative, regardless of the source format.
pub const DERIVATIVE_MIME_TYPE: &str = "image/webp";

/// Extension appended to every derivative filename.
pub const DERIVATIVE_EXTENSION: &str = "webp";

/// Name of the field group a record's derivative metadata lives under.
pub const DERIVATIVE_FIELD: &str = "derivative";

/// Persisted result of one encode: what was written and how big it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivativeMetadata {
    /// Storage-relative name including extension.
    pub filename: String,
    /// Encoded size in bytes.
    pub filesize: u64,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

/// The `derivative` field group: primary derivative plus named size variants.
///
/// ```json
/// {
///   "filename": "photo-800x600.webp", "filesize": 51234,
///   "width": 800, "height": 600, "mimeType": "image/webp",
///   "sizes": { "thumb": { "filename": "photo-100x100.webp", ... } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeField {
    #[serde(flatten)]
    pub primary: DerivativeMetadata,
    #[serde(default)]
    pub sizes: BTreeMap<String, DerivativeMetadata>,
}

impl DerivativeField {
    /// Every filename the field references, primary first.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.filename.as_str())
            .chain(self.sizes.values().map(|m| m.filename.as_str()))
    }
}

/// Upload bytes that arrived with a record change.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub data: Bytes,
    /// Original filename as uploaded, extension included.
    pub name: String,
    pub mime_type: String,
}

impl UploadFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Progress of a running regeneration.
///
/// `current` is the 1-based page index; with a page size of one, `total` is
/// also the record count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerationStatus {
    pub current_file: Option<String>,
    pub current: u64,
    pub total: u64,
}

impl RegenerationStatus {
    pub fn starting() -> Self {
        Self {
            current_file: None,
            current: 1,
            total: 0,
        }
    }
}
