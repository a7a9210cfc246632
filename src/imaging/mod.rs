//! Image encoding: any supported raster in, WebP out.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode + orient** | `image` decoders, EXIF orientation |
//! | **Resize** | Lanczos3, sharp-style fits and crop anchors |
//! | **Encode → WebP** | `webp` (libwebp) |
//! | **Metadata** | EXIF chunk in an extended WebP container |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing an encode
//! - **Backend**: [`EncodeEngine`] trait + [`RustBackend`]
//! - **Container**: RIFF chunk editing for EXIF passthrough

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;
pub(crate) mod webp_container;

pub use backend::{BackendError, EncodeEngine, Encoded};
pub use calculations::{ResizePlan, plan_resize};
pub use params::{CropAnchor, EncodeParams, Fit, Quality, ResizeSpec};
pub use rust_backend::RustBackend;
