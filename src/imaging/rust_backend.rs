//! Pure Rust decode + resize backend with libwebp encoding.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image` crate decoders |
//! | Orientation | `ImageDecoder::orientation` + `DynamicImage::apply_orientation` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Crop / pad | `crop_imm` / `imageops::overlay` on a transparent canvas |
//! | Encode → WebP | `webp::Encoder::encode_simple` (lossy or lossless) |
//! | EXIF passthrough | custom [`webp_container`](super::webp_container) |

use super::backend::{BackendError, EncodeEngine, Encoded};
use super::calculations::{ResizePlan, plan_resize};
use super::params::EncodeParams;
use super::webp_container;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem for pixels and
/// libwebp for the final encode.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded source with orientation already applied.
struct Source {
    image: DynamicImage,
    exif: Option<Vec<u8>>,
}

fn decode(data: &[u8], keep_exif: bool) -> Result<Source, BackendError> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| BackendError::Decode(e.to_string()))?;

    let orientation = decoder
        .orientation()
        .map_err(|e| BackendError::Decode(e.to_string()))?;
    // Unreadable EXIF is not worth failing the conversion over
    let exif = if keep_exif {
        decoder.exif_metadata().ok().flatten()
    } else {
        None
    };

    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|e| BackendError::Decode(e.to_string()))?;
    image.apply_orientation(orientation);
    Ok(Source { image, exif })
}

fn apply_plan(image: DynamicImage, plan: &ResizePlan) -> DynamicImage {
    let (w, h) = plan.scale_to;
    let mut out = if (image.width(), image.height()) == (w, h) {
        image
    } else {
        image.resize_exact(w, h, FilterType::Lanczos3)
    };

    if let Some((x, y, cw, ch)) = plan.crop {
        out = out.crop_imm(x, y, cw, ch);
    }

    if let Some((cw, ch)) = plan.pad_to {
        let mut canvas = RgbaImage::new(cw, ch);
        let x = (cw - out.width()) / 2;
        let y = (ch - out.height()) / 2;
        image::imageops::overlay(&mut canvas, &out.to_rgba8(), x as i64, y as i64);
        out = DynamicImage::ImageRgba8(canvas);
    }
    out
}

fn encode_webp(image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
    let (width, height) = (image.width(), image.height());
    let quality = params.quality.value() as f32;

    let memory = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height)
            .encode_simple(params.lossless, quality)
    } else {
        let rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height)
            .encode_simple(params.lossless, quality)
    }
    .map_err(|e| BackendError::ProcessingFailed(format!("WebP encode failed: {e:?}")))?;

    Ok(memory.to_vec())
}

impl EncodeEngine for RustBackend {
    fn encode(&self, data: &[u8], params: &EncodeParams) -> Result<Encoded, BackendError> {
        let Source { image, exif } = decode(data, params.keep_metadata)?;

        let source_dims = (image.width(), image.height());
        let image = match params.resize.as_ref().and_then(|s| plan_resize(source_dims, s)) {
            Some(plan) => apply_plan(image, &plan),
            None => image,
        };

        let (width, height) = (image.width(), image.height());
        let mut encoded = encode_webp(&image, params)?;

        if let Some(exif) = exif {
            match webp_container::embed_exif(&encoded, &exif, width, height) {
                Some(tagged) => encoded = tagged,
                None => tracing::debug!("source EXIF could not be embedded, dropping it"),
            }
        }

        Ok(Encoded {
            data: encoded,
            width,
            height,
        })
    }
}
