//! Parameter types for encode operations.
//!
//! These structs describe *what* to produce, not *how*. They sit between the
//! derivative encoder (which decides what each derivative should look like)
//! and the [`backend`](super::backend) (which does the pixel work), so a mock
//! backend can stand in for the real one in tests.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy WebP quality (0–100, default 50). Clamped on construction.
//! - [`CropAnchor`]: Which part of the image survives a `cover` crop.
//! - [`Fit`]: How the source is fitted into a target box.
//! - [`ResizeSpec`]: Target width/height (either may be absent) plus fit and anchor.
//! - [`EncodeParams`]: Everything one encode call needs.

use serde::{Deserialize, Serialize};

/// Quality setting for lossy WebP encoding (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.min(100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(50)
    }
}

/// Anchor used when cropping a `cover` resize down to the exact target box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CropAnchor {
    #[default]
    #[serde(alias = "center")]
    Centre,
    #[serde(alias = "north")]
    Top,
    #[serde(alias = "south")]
    Bottom,
    #[serde(alias = "west")]
    Left,
    #[serde(alias = "east")]
    Right,
    #[serde(alias = "northwest", alias = "left-top")]
    TopLeft,
    #[serde(alias = "northeast", alias = "right-top")]
    TopRight,
    #[serde(alias = "southwest", alias = "left-bottom")]
    BottomLeft,
    #[serde(alias = "southeast", alias = "right-bottom")]
    BottomRight,
}

impl CropAnchor {
    /// Horizontal and vertical placement, each 0 (start), 1 (middle) or 2 (end).
    pub(crate) fn placement(self) -> (u32, u32) {
        match self {
            CropAnchor::Centre => (1, 1),
            CropAnchor::Top => (1, 0),
            CropAnchor::Bottom => (1, 2),
            CropAnchor::Left => (0, 1),
            CropAnchor::Right => (2, 1),
            CropAnchor::TopLeft => (0, 0),
            CropAnchor::TopRight => (2, 0),
            CropAnchor::BottomLeft => (0, 2),
            CropAnchor::BottomRight => (2, 2),
        }
    }
}

/// How the source is fitted into the target box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Fill the box, cropping the overflow at the anchor.
    #[default]
    Cover,
    /// Fit inside the box, then pad to the exact box with transparency.
    Contain,
    /// Stretch to the exact box, ignoring aspect ratio.
    Fill,
    /// Fit inside the box, aspect preserved, no padding.
    Inside,
    /// Cover the box, aspect preserved, no cropping.
    Outside,
}

/// Target dimensions for one derivative. An absent side follows the source
/// aspect ratio; both absent means "re-encode only".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    #[serde(alias = "position")]
    pub crop: CropAnchor,
}

impl ResizeSpec {
    pub fn is_noop(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// Full specification of one encode call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeParams {
    pub quality: Quality,
    pub lossless: bool,
    /// Carry the source EXIF block into the output.
    pub keep_metadata: bool,
    pub resize: Option<ResizeSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 0);
        assert_eq!(Quality::new(75).value(), 75);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_50() {
        assert_eq!(Quality::default().value(), 50);
    }

    #[test]
    fn crop_anchor_accepts_sharp_style_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            crop: CropAnchor,
        }
        let parse = |s: &str| toml::from_str::<Wrapper>(&format!("crop = \"{s}\"")).unwrap().crop;

        assert_eq!(parse("centre"), CropAnchor::Centre);
        assert_eq!(parse("center"), CropAnchor::Centre);
        assert_eq!(parse("north"), CropAnchor::Top);
        assert_eq!(parse("bottom"), CropAnchor::Bottom);
        assert_eq!(parse("southeast"), CropAnchor::BottomRight);
        assert_eq!(parse("top-left"), CropAnchor::TopLeft);
    }

    #[test]
    fn resize_spec_without_dimensions_is_noop() {
        assert!(ResizeSpec::default().is_noop());
        assert!(
            !ResizeSpec {
                width: Some(10),
                ..ResizeSpec::default()
            }
            .is_noop()
        );
    }
}
