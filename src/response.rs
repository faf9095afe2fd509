// response.rs - Normalisation of the raw integral result, and display scaling.
//
// `normalize_response` is the last pipeline stage: raw / L, reshaped to the
// input dimensions. Nothing is clamped there; the values are the response.
//
// `to_display_u8` belongs to the output side. It stretches a response field
// to the full 0..=255 range using its own min and max.

use crate::error::{Result, SfegoError};
use crate::image::Image;

/// Divide every raw sample by the neighbor-list length and reshape to
/// `width × height`.
///
/// # Errors
/// [`SfegoError::ShapeMismatch`] if `raw` does not hold `width * height`
/// samples or `neighbor_count` is zero.
pub fn normalize_response(
    mut raw: Vec<f32>,
    neighbor_count: usize,
    width: usize,
    height: usize,
) -> Result<Image<f32>> {
    if neighbor_count == 0 {
        return Err(SfegoError::ShapeMismatch { what: "neighbor list", expected: 1, actual: 0 });
    }
    let scale = 1.0 / neighbor_count as f32;
    for v in raw.iter_mut() {
        *v *= scale;
    }
    Image::try_from_vec(width, height, raw)
}

/// Stretch `field` linearly so its minimum maps to 0 and its maximum to 255.
///
/// A flat field (max == min) maps to all zeros.
pub fn to_display_u8(field: &Image<f32>) -> Image<u8> {
    let Some((lo, hi)) = field.min_max() else {
        return Image::new(field.width(), field.height());
    };
    let span = hi - lo;
    if span <= f32::EPSILON * hi.abs().max(1.0) {
        return Image::new(field.width(), field.height());
    }
    let data = field
        .as_slice()
        .iter()
        .map(|&v| (255.0 * (v - lo) / span).clamp(0.0, 255.0).round() as u8)
        .collect();
    Image::from_vec(field.width(), field.height(), data)
}
