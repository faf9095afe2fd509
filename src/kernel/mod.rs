// kernel/mod.rs - Compute-kernel contract shared by every backend.
//
// A kernel is the unit that owns device memory and runs the two stencil
// stages. The pipeline drives it through a fixed, linear sequence:
//
//   allocate → upload_neighbors → upload_image
//            → gradient → barrier → integral
//            → download_result
//
// and never looks inside the buffers. Two kernels ship with the crate:
//
//   CpuKernel   kernel/cpu.rs   rayon over block rows. Authoritative
//                               reference; every other kernel is validated
//                               against it.
//   GpuKernel   gpu/kernel.rs   wgpu compute, WGSL entry points
//                               `sfego_gradient` / `sfego_integral`.
//
// PER-PIXEL ARITHMETIC
// ────────────────────
// For pixel p with neighbor offsets n (direction θ_n), after the boundary
// policy maps p + n to a source index s (or drops it under `Skip`):
//
//   gradient:   g          = Σ_n (I[s] − I[p]) · (cos θ_n, sin θ_n)
//               difference = |g| / L
//               direction  = atan2(g.y, g.x)  in [0, 2π)
//
//   integral:   raw        = −Σ_n difference[s] · cos(direction[s] − θ_n)
//
// `direction` points toward increasing intensity. A neighbor whose gradient
// points back at p (θ = θ_n + π) means p sits on the bright side, so it adds
// +difference. The pipeline divides `raw` by L afterwards.
//
// The functions below are the single source of that arithmetic on the host.
// `shaders/sfego.wgsl` mirrors them line for line.

pub mod cpu;

use std::f32::consts::TAU;
use std::fmt;

use crate::dispatch::{BlockSize, Launch};
use crate::error::Result;
use crate::neighbor::NeighborList;

// ---------------------------------------------------------------------------
// Boundary policy
// ---------------------------------------------------------------------------

/// How a stage reads a neighbor that falls outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryPolicy {
    /// Replicate the nearest edge sample.
    #[default]
    Clamp,
    /// Wrap around to the opposite edge (toroidal image).
    Wrap,
    /// Leave the neighbor out of the sum. The normaliser still divides by
    /// the full list length.
    Skip,
}

impl BoundaryPolicy {
    /// Numeric code passed to GPU kernels. Must match `BOUNDARY_*` in
    /// `sfego.wgsl`.
    pub fn code(self) -> u32 {
        match self {
            BoundaryPolicy::Clamp => 0,
            BoundaryPolicy::Wrap => 1,
            BoundaryPolicy::Skip => 2,
        }
    }

    /// Map `(x, y)` (possibly out of bounds) to a flat index, or `None` if
    /// the policy drops it.
    #[inline]
    pub fn resolve(self, x: i64, y: i64, width: usize, height: usize) -> Option<usize> {
        let (w, h) = (width as i64, height as i64);
        let (sx, sy) = match self {
            BoundaryPolicy::Clamp => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
            BoundaryPolicy::Wrap => (x.rem_euclid(w), y.rem_euclid(h)),
            BoundaryPolicy::Skip => {
                if x < 0 || y < 0 || x >= w || y >= h {
                    return None;
                }
                (x, y)
            }
        };
        Some(sy as usize * width + sx as usize)
    }
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryPolicy::Clamp => write!(f, "clamp"),
            BoundaryPolicy::Wrap => write!(f, "wrap"),
            BoundaryPolicy::Skip => write!(f, "skip"),
        }
    }
}

impl std::str::FromStr for BoundaryPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clamp" => Ok(BoundaryPolicy::Clamp),
            "wrap" => Ok(BoundaryPolicy::Wrap),
            "skip" => Ok(BoundaryPolicy::Skip),
            other => Err(format!("unknown boundary policy '{other}' (clamp|wrap|skip)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel contract
// ---------------------------------------------------------------------------

/// Per-invocation memory owned by one kernel.
///
/// Dropping a buffer set releases all of its memory.
pub trait DeviceBuffers: Send {
    /// Elements in each per-pixel field.
    fn pixel_count(&self) -> usize;

    /// Elements in each neighbor array.
    fn neighbor_count(&self) -> usize;

    /// Radius whose neighbor arrays are currently resident, if any.
    fn resident_radius(&self) -> Option<u32>;
}

/// A pluggable two-stage stencil kernel.
///
/// Implementations are created once per process (shader compilation, device
/// selection) and then invoked any number of times. Each method blocks until
/// its work has finished or been queued in order; `barrier` is the one point
/// where all gradient-stage writes must be complete before returning.
pub trait StencilKernel: Send + Sync {
    type Buffers: DeviceBuffers;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Check that launches with `block` can run on this kernel.
    fn validate_block(&self, block: BlockSize) -> Result<()>;

    /// Allocate the image/difference/direction/result fields
    /// (`pixel_count` elements each) and the dx/dy/angle arrays
    /// (`neighbor_count` elements each).
    fn allocate(&self, pixel_count: usize, neighbor_count: usize) -> Result<Self::Buffers>;

    /// Upload the neighbor arrays.
    fn upload_neighbors(&self, buffers: &mut Self::Buffers, neighbors: &NeighborList) -> Result<()>;

    /// Upload the flattened input image.
    fn upload_image(&self, buffers: &mut Self::Buffers, image: &[f32]) -> Result<()>;

    /// Gradient stage: image + neighbors → difference, direction.
    fn gradient(&self, buffers: &mut Self::Buffers, launch: &Launch, boundary: BoundaryPolicy) -> Result<()>;

    /// Whole-grid barrier between the stages.
    fn barrier(&self, buffers: &mut Self::Buffers) -> Result<()>;

    /// Integral stage: difference, direction + neighbors → raw result.
    fn integral(&self, buffers: &mut Self::Buffers, launch: &Launch, boundary: BoundaryPolicy) -> Result<()>;

    /// Copy the raw result field back to the host.
    fn download_result(&self, buffers: &mut Self::Buffers) -> Result<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Reference per-pixel arithmetic
// ---------------------------------------------------------------------------

/// Borrowed neighbor arrays, as the kernels see them.
#[derive(Debug, Clone, Copy)]
pub struct NeighborView<'a> {
    pub dx: &'a [i32],
    pub dy: &'a [i32],
    pub angle: &'a [f32],
}

impl NeighborView<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.dx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dx.is_empty()
    }
}

/// Gradient stage for one pixel. Returns `(difference, direction)`.
#[inline]
pub fn gradient_at(
    image: &[f32],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    nb: NeighborView<'_>,
    boundary: BoundaryPolicy,
) -> (f32, f32) {
    let center = image[y * width + x];
    let mut gx = 0.0f32;
    let mut gy = 0.0f32;
    for k in 0..nb.len() {
        let sx = x as i64 + nb.dx[k] as i64;
        let sy = y as i64 + nb.dy[k] as i64;
        let Some(s) = boundary.resolve(sx, sy, width, height) else {
            continue;
        };
        let d = image[s] - center;
        gx += d * nb.angle[k].cos();
        gy += d * nb.angle[k].sin();
    }

    let difference = (gx * gx + gy * gy).sqrt() / nb.len() as f32;
    let mut direction = gy.atan2(gx);
    if direction < 0.0 {
        direction += TAU;
    }
    (difference, direction)
}

/// Integral stage for one pixel. Returns the raw (un-normalised) response.
#[inline]
#[allow(clippy::too_many_arguments)]
pub fn integral_at(
    difference: &[f32],
    direction: &[f32],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    nb: NeighborView<'_>,
    boundary: BoundaryPolicy,
) -> f32 {
    let mut acc = 0.0f32;
    for k in 0..nb.len() {
        let sx = x as i64 + nb.dx[k] as i64;
        let sy = y as i64 + nb.dy[k] as i64;
        let Some(s) = boundary.resolve(sx, sy, width, height) else {
            continue;
        };
        acc += difference[s] * (direction[s] - nb.angle[k]).cos();
    }
    -acc
}
