// scale.rs - Multi-scale driver: scale records, resizing, artifact naming.
//
// A scale file lists one pass per line:
//
//   <resize_ratio> <execute_radius>
//   1.0 4
//   2.0 4
//   4.0 8
//
// For each record the source image is shrunk to
// (floor(w / ratio), floor(h / ratio)), the pipeline runs at
// `execute_radius`, and the response is resized back to w × h. The radius
// the pass effectively covers in source pixels is ratio × radius.
//
// Blank lines and lines starting with '#' are ignored. Any other line that
// does not parse fails only that record; the caller decides whether to
// continue with the rest.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::info;

use crate::error::{Result, SfegoError};
use crate::image::{resize_bilinear, Image, Sample};
use crate::kernel::StencilKernel;
use crate::pipeline::SfegoPipeline;

/// One `(resize_ratio, execute_radius)` pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRecord {
    /// Downsampling factor applied before the stencil (> 0).
    pub resize_ratio: f64,
    /// Neighbor-list radius at the reduced resolution (>= 1).
    pub execute_radius: u32,
}

impl ScaleRecord {
    pub fn new(resize_ratio: f64, execute_radius: u32) -> Result<Self> {
        let record = ScaleRecord { resize_ratio, execute_radius };
        record.validate().map_err(|reason| SfegoError::ScaleRecord { line: 0, reason })?;
        Ok(record)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.resize_ratio.is_finite() || self.resize_ratio <= 0.0 {
            return Err(format!("resize ratio must be a positive number (got {})", self.resize_ratio));
        }
        if self.execute_radius == 0 {
            return Err("execute radius must be >= 1".to_string());
        }
        Ok(())
    }

    /// Radius in source-image pixels: `resize_ratio × execute_radius`.
    pub fn effective_radius(&self) -> f64 {
        self.resize_ratio * self.execute_radius as f64
    }

    /// Working resolution for a `width × height` source (truncating).
    pub fn target_size(&self, width: usize, height: usize) -> (usize, usize) {
        (
            (width as f64 / self.resize_ratio) as usize,
            (height as f64 / self.resize_ratio) as usize,
        )
    }
}

impl FromStr for ScaleRecord {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let ratio = fields.next().ok_or("missing resize ratio")?;
        let radius = fields.next().ok_or("missing execute radius")?;
        if let Some(extra) = fields.next() {
            return Err(format!("unexpected trailing field '{extra}'"));
        }
        let resize_ratio: f64 = ratio
            .parse()
            .map_err(|e| format!("invalid resize ratio '{ratio}': {e}"))?;
        let execute_radius: u32 = radius
            .parse()
            .map_err(|e| format!("invalid execute radius '{radius}': {e}"))?;
        let record = ScaleRecord { resize_ratio, execute_radius };
        record.validate()?;
        Ok(record)
    }
}

impl fmt::Display for ScaleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} (effective radius {})",
            python_float(self.resize_ratio),
            self.execute_radius,
            python_float(round2(self.effective_radius()))
        )
    }
}

/// Parse a scale file's text. Each non-blank, non-comment line yields one
/// result, tagged with its 1-based line number on error.
pub fn parse_scale_records(text: &str) -> Vec<Result<ScaleRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(|(i, line)| {
            line.parse::<ScaleRecord>()
                .map_err(|reason| SfegoError::ScaleRecord { line: i + 1, reason })
        })
        .collect()
}

/// Run one scale pass: shrink, compute, grow back to the source size.
///
/// # Errors
/// [`SfegoError::EmptyImage`] when the ratio shrinks an axis to zero, plus
/// anything the pipeline returns.
pub fn run_scale<K: StencilKernel, T: Sample>(
    pipeline: &SfegoPipeline<K>,
    source: &Image<T>,
    record: &ScaleRecord,
) -> Result<Image<f32>> {
    let (width, height) = source.dimensions();
    let (tw, th) = record.target_size(width, height);
    info!(
        ratio = record.resize_ratio,
        radius = record.execute_radius,
        target_width = tw,
        target_height = th,
        "scale pass"
    );

    // The shrunk image keeps the source sample type, so u8 input is
    // rounded back to integers before the stencil sees it.
    let working: Image<T> = resize_bilinear(source, tw, th)?.convert();
    let response = pipeline.compute(&working, record.execute_radius)?;
    resize_bilinear(&response, width, height)
}

/// Output file name for one pass over `source`:
/// `{source}_GMEMD_SpatialFrame{effective}({ratio}x{radius}).png`.
///
/// The effective radius is rounded to two decimals, exact halves to even.
/// Floats keep a trailing
/// `.0` when integral, so ratio 2 and radius 4 give `8.0(2.0x4)`.
pub fn artifact_name(source: &Path, record: &ScaleRecord) -> String {
    format!(
        "{}_GMEMD_SpatialFrame{}({}x{}).png",
        source.display(),
        python_float(round2(record.effective_radius())),
        python_float(record.resize_ratio),
        record.execute_radius,
    )
}

/// Two-decimal rounding with exact halves going to even, so 1.125 → 1.12.
fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

/// Shortest round-trip rendering, keeping `.0` on integral values.
fn python_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
