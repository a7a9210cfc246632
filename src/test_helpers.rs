//! Shared test utilities for the webp-derive test suite.
//!
//! Provides fixture images, a pipeline wired to a temp directory, and
//! storage/record-store wrappers that can be told to fail.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let pipeline = mock_pipeline(tmp.path(), vec![size_spec("thumb", 100, 100)]);
//! let record = create_record(&pipeline, "photo.jpg", "image/jpeg").await;
//! pipeline.storage().fail_writes(true);
//! ```

use crate::config::{CollectionConfig, Config, SizeSpec};
use crate::imaging::backend::tests::MockBackend;
use crate::imaging::{EncodeEngine, RustBackend};
use crate::pipeline::Pipeline;
use crate::records::{JsonRecordStore, Page, PageQuery, Record, RecordError, RecordStore};
use crate::storage::{FsStorage, Storage};
use crate::types::{DerivativeField, DerivativeMetadata, UploadFile};
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Slug of the single collection configured by [`test_config`].
pub const COLLECTION: &str = "media";

// =========================================================================
// Fixture images
// =========================================================================

/// Encode a gradient as JPEG.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
    buf.into_inner()
}

/// Encode a PNG whose alpha varies across the image.
pub fn png_rgba_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        Rgba([200, 40, 40, (x * 255 / width.max(1)) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// A 64x48 JPEG upload named `name`.
pub fn jpeg_upload(name: &str) -> UploadFile {
    UploadFile {
        data: Bytes::from(jpeg_bytes(64, 48)),
        name: name.to_string(),
        mime_type: "image/jpeg".to_string(),
    }
}

/// Write a JPEG original into the test collection's directory.
pub fn write_original(root: &Path, filename: &str) {
    let dir = root.join(COLLECTION);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(filename), jpeg_bytes(64, 48)).unwrap();
}

// =========================================================================
// Config
// =========================================================================

pub fn size_spec(name: &str, width: u32, height: u32) -> SizeSpec {
    SizeSpec {
        name: name.to_string(),
        width: Some(width),
        height: Some(height),
        crop: Default::default(),
        fit: None,
    }
}

/// Defaults plus one [`COLLECTION`] rooted at `root`.
pub fn test_config(root: &Path, sizes: Vec<SizeSpec>) -> Config {
    let mut collection = CollectionConfig::new(COLLECTION);
    collection.sizes = sizes;
    Config {
        root: root.to_path_buf(),
        collections: vec![collection],
        ..Config::default()
    }
}

// =========================================================================
// Failure-injecting ports
// =========================================================================

/// [`FsStorage`] with switchable write and delete failures.
#[derive(Default)]
pub struct TestStorage {
    inner: FsStorage,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl TestStorage {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "injected failure")
}

impl Storage for TestStorage {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        self.inner.exists(path).await
    }

    async fn read_all(&self, path: &Path) -> io::Result<Bytes> {
        self.inner.read_all(path).await
    }

    async fn write_all(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.write_all(path, data).await
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.delete(path).await
    }
}

/// [`JsonRecordStore`] with switchable page-read failures. Records the
/// page number of every `find_page` call.
pub struct TestRecords {
    inner: JsonRecordStore,
    fail_pages: AtomicBool,
    page_reads: Mutex<Vec<u64>>,
}

impl TestRecords {
    pub fn new(dir: &Path) -> Self {
        Self {
            inner: JsonRecordStore::new(dir),
            fail_pages: AtomicBool::new(false),
            page_reads: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &JsonRecordStore {
        &self.inner
    }

    pub fn fail_pages(&self, fail: bool) {
        self.fail_pages.store(fail, Ordering::SeqCst);
    }

    pub fn page_reads(&self) -> Vec<u64> {
        self.page_reads.lock().unwrap().clone()
    }
}

impl RecordStore for TestRecords {
    async fn find_page(&self, collection: &str, query: &PageQuery) -> Result<Page, RecordError> {
        self.page_reads.lock().unwrap().push(query.page);
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(RecordError::Io {
                path: self.inner.dir().join(format!("{collection}.json")),
                source: injected(),
            });
        }
        self.inner.find_page(collection, query).await
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Record, RecordError> {
        self.inner.find_by_id(collection, id).await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<Record, RecordError> {
        self.inner.update_by_id(collection, id, partial).await
    }
}

// =========================================================================
// Pipelines
// =========================================================================

/// Records live under `<root>/records`.
pub fn pipeline_from_config<E: EncodeEngine + 'static>(
    config: Config,
    engine: E,
) -> Pipeline<TestStorage, TestRecords, E> {
    let records = TestRecords::new(&config.root.join("records"));
    Pipeline::new(TestStorage::default(), records, engine, config)
}

pub fn pipeline_with_engine<E: EncodeEngine + 'static>(
    root: &Path,
    sizes: Vec<SizeSpec>,
    engine: E,
) -> Pipeline<TestStorage, TestRecords, E> {
    pipeline_from_config(test_config(root, sizes), engine)
}

pub fn mock_pipeline(
    root: &Path,
    sizes: Vec<SizeSpec>,
) -> Pipeline<TestStorage, TestRecords, MockBackend> {
    pipeline_with_engine(root, sizes, MockBackend::new())
}

pub fn real_pipeline(
    root: &Path,
    sizes: Vec<SizeSpec>,
) -> Pipeline<TestStorage, TestRecords, RustBackend> {
    pipeline_with_engine(root, sizes, RustBackend::new())
}

// =========================================================================
// Records
// =========================================================================

pub async fn create_record<E: EncodeEngine + 'static>(
    pipeline: &Pipeline<TestStorage, TestRecords, E>,
    filename: &str,
    mime_type: &str,
) -> Record {
    let fields = json!({ "filename": filename, "mimeType": mime_type });
    create_with_fields(pipeline, fields).await
}

/// Like [`create_record`] with a fixed `createdAt`, for ordering tests.
pub async fn create_record_at<E: EncodeEngine + 'static>(
    pipeline: &Pipeline<TestStorage, TestRecords, E>,
    filename: &str,
    mime_type: &str,
    created_at: &str,
) -> Record {
    let fields = json!({
        "filename": filename,
        "mimeType": mime_type,
        "createdAt": created_at,
    });
    create_with_fields(pipeline, fields).await
}

async fn create_with_fields<E: EncodeEngine + 'static>(
    pipeline: &Pipeline<TestStorage, TestRecords, E>,
    fields: Value,
) -> Record {
    let Value::Object(fields) = fields else {
        panic!("record fields must be an object")
    };
    pipeline
        .records()
        .inner()
        .create(COLLECTION, fields)
        .await
        .unwrap()
}

fn webp_meta(filename: &str) -> DerivativeMetadata {
    DerivativeMetadata {
        filename: filename.to_string(),
        filesize: 1,
        width: 1,
        height: 1,
        mime_type: "image/webp".to_string(),
    }
}

/// An unsaved record carrying a derivative field with the given files.
/// Sizes are named `s0`, `s1`, …
pub fn record_with_derivative(primary: &str, sizes: &[&str]) -> Record {
    let field = DerivativeField {
        primary: webp_meta(primary),
        sizes: sizes
            .iter()
            .enumerate()
            .map(|(i, name)| (format!("s{i}"), webp_meta(name)))
            .collect::<BTreeMap<_, _>>(),
    };
    let mut fields = Map::new();
    fields.insert("filename".to_string(), json!("photo.jpg"));
    fields.insert("mimeType".to_string(), json!("image/jpeg"));
    fields.insert("derivative".to_string(), serde_json::to_value(field).unwrap());
    Record {
        id: "record-1".to_string(),
        fields,
    }
}
