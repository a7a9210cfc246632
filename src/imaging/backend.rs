//! Encode engine trait and shared types.
//!
//! The [`EncodeEngine`] trait is the single capability the derivative
//! pipeline needs from an image library: take source bytes, normalise
//! orientation, optionally resize, and re-encode as WebP.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use
//! [`tests::MockBackend`], which records every call and returns canned
//! dimensions without touching pixels.

use super::params::EncodeParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode source image: {0}")]
    Decode(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Output of one encode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Encoded {
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Trait for WebP encode engines.
///
/// Implementations are synchronous and CPU-bound; async callers run them on a
/// blocking thread. Orientation is applied before any resize, and the
/// reported dimensions are those of the encoded output, not the request.
pub trait EncodeEngine: Send + Sync {
    fn encode(&self, data: &[u8], params: &EncodeParams) -> Result<Encoded, BackendError>;
}
