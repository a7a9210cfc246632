//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images. The
//! backend asks [`plan_resize`] what to do and then just executes the plan.

use super::params::{CropAnchor, Fit, ResizeSpec};

/// Pixel operations needed to satisfy one [`ResizeSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    /// Dimensions to resample the source to.
    pub scale_to: (u32, u32),
    /// Region `(x, y, width, height)` to cut from the resampled image.
    pub crop: Option<(u32, u32, u32, u32)>,
    /// Transparent canvas to centre the resampled image on.
    pub pad_to: Option<(u32, u32)>,
}

impl ResizePlan {
    pub fn output_dimensions(&self) -> (u32, u32) {
        if let Some((_, _, w, h)) = self.crop {
            (w, h)
        } else if let Some(canvas) = self.pad_to {
            canvas
        } else {
            self.scale_to
        }
    }
}

fn scaled(value: u32, ratio: f64) -> u32 {
    ((value as f64 * ratio).round() as u32).max(1)
}

/// Resolve the target box, filling a missing side from the source aspect ratio.
///
/// Returns `None` when neither side is given.
pub fn resolve_target(source: (u32, u32), spec: &ResizeSpec) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    match (spec.width, spec.height) {
        (Some(w), Some(h)) => Some((w.max(1), h.max(1))),
        (Some(w), None) => Some((w.max(1), scaled(src_h, w as f64 / src_w as f64))),
        (None, Some(h)) => Some((scaled(src_w, h as f64 / src_h as f64), h.max(1))),
        (None, None) => None,
    }
}

/// Calculate dimensions that fit entirely inside a target area.
///
/// Aspect ratio is preserved; one side matches exactly, the other may be smaller.
pub fn calculate_fit_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: width matches, height shrinks
        (tgt_w, scaled(tgt_w, 1.0 / src_aspect))
    } else {
        (scaled(tgt_h, src_aspect), tgt_h)
    }
}

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        (scaled(tgt_h, src_aspect), tgt_h)
    } else {
        // Source is taller: width will match, height will exceed
        (tgt_w, scaled(tgt_w, 1.0 / src_aspect))
    }
}

/// Top-left corner of a `target` window inside `filled`, placed at `anchor`.
pub fn crop_offset(filled: (u32, u32), target: (u32, u32), anchor: CropAnchor) -> (u32, u32) {
    let (h_place, v_place) = anchor.placement();
    let slack_x = filled.0.saturating_sub(target.0);
    let slack_y = filled.1.saturating_sub(target.1);
    (slack_x * h_place / 2, slack_y * v_place / 2)
}

/// Work out how to turn a `source`-sized image into the requested derivative.
///
/// Returns `None` when the spec asks for no resize at all.
pub fn plan_resize(source: (u32, u32), spec: &ResizeSpec) -> Option<ResizePlan> {
    let target = resolve_target(source, spec)?;

    // With a single side given every fit collapses to an aspect-preserving scale.
    let fit = if spec.width.is_none() || spec.height.is_none() {
        Fit::Fill
    } else {
        spec.fit
    };

    let plan = match fit {
        Fit::Fill => ResizePlan {
            scale_to: target,
            crop: None,
            pad_to: None,
        },
        Fit::Inside => ResizePlan {
            scale_to: calculate_fit_dimensions(source, target),
            crop: None,
            pad_to: None,
        },
        Fit::Outside => ResizePlan {
            scale_to: calculate_fill_dimensions(source, target),
            crop: None,
            pad_to: None,
        },
        Fit::Contain => {
            let inner = calculate_fit_dimensions(source, target);
            ResizePlan {
                scale_to: inner,
                crop: None,
                pad_to: (inner != target).then_some(target),
            }
        }
        Fit::Cover => {
            let filled = calculate_fill_dimensions(source, target);
            let crop = (filled != target).then(|| {
                let (x, y) = crop_offset(filled, target, spec.crop);
                (x, y, target.0, target.1)
            });
            ResizePlan {
                scale_to: filled,
                crop,
                pad_to: None,
            }
        }
    };
    Some(plan)
}
