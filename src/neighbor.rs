// neighbor.rs - Angularly ordered neighbor offsets within a disk.
//
// Both stencil stages walk the same list, so its order is part of the
// kernel contract: the integral stage may treat consecutive entries as
// consecutive directions around the center pixel.
//
// CONSTRUCTION
// ────────────
// For every lattice point (i, j) with i, j ∈ [-r, r], row-major (i outer,
// j inner):
//
//   keep iff  sqrt(i² + j²) < r + 1  and  (i, j) ≠ (0, 0)
//
//   dx       = j
//   dy       = i
//   angle    = atan2(j, i), shifted into [0, 2π)
//   distance = sqrt(i² + j²)
//
// then stable-sort by (angle, distance). Ties on both keys keep enumeration
// order. Note the angle is measured with the row offset on the cosine axis:
// angle 0 points down (+dy), angle π/2 points right (+dx).
//
// For r = 1 the disk test admits the diagonals (√2 < 2), giving the full
// 3×3 Moore neighborhood:
//
//     angle:  0      π/4     π/2    3π/4    π     5π/4    3π/2   7π/4
//     (dx,dy) (0,1)  (1,1)   (1,0)  (1,-1)  (0,-1) (-1,-1) (-1,0) (-1,1)

use std::cmp::Ordering;
use std::f64::consts::TAU;

use crate::error::{Result, SfegoError};

/// One lattice point relative to a center pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborOffset {
    /// Column offset.
    pub dx: i32,
    /// Row offset.
    pub dy: i32,
    /// Direction in `[0, 2π)`, `atan2(dx, dy)`.
    pub angle: f64,
    /// Euclidean length of the offset.
    pub distance: f64,
}

/// Immutable, angle-sorted list of neighbor offsets for one radius.
///
/// Build with [`build_neighbor_list`]. The same radius always produces the
/// same sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborList {
    radius: u32,
    offsets: Vec<NeighborOffset>,
}

impl NeighborList {
    /// Radius this list was built for.
    #[inline]
    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Number of offsets (the normalisation divisor `L`).
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Always false for a list produced by [`build_neighbor_list`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[NeighborOffset] {
        &self.offsets
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborOffset> + '_ {
        self.offsets.iter()
    }

    /// Split into the flat arrays uploaded to the compute kernel.
    ///
    /// Angles are narrowed to `f32`, which is what the kernels consume.
    pub fn to_arrays(&self) -> NeighborArrays {
        let mut arrays = NeighborArrays {
            dx: Vec::with_capacity(self.len()),
            dy: Vec::with_capacity(self.len()),
            angle: Vec::with_capacity(self.len()),
        };
        for o in &self.offsets {
            arrays.dx.push(o.dx);
            arrays.dy.push(o.dy);
            arrays.angle.push(o.angle as f32);
        }
        arrays
    }
}

/// Structure-of-arrays form of a [`NeighborList`], in kernel element types.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborArrays {
    pub dx: Vec<i32>,
    pub dy: Vec<i32>,
    pub angle: Vec<f32>,
}

impl NeighborArrays {
    #[inline]
    pub fn len(&self) -> usize {
        self.dx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dx.is_empty()
    }
}

/// Build the angle-sorted neighbor list for `radius`.
///
/// # Errors
/// [`SfegoError::InvalidRadius`] when `radius == 0`, or when the
/// `(2r + 1)²` candidate square is too large to enumerate in memory.
pub fn build_neighbor_list(radius: u32) -> Result<NeighborList> {
    if radius == 0 {
        return Err(SfegoError::InvalidRadius(radius));
    }

    // Offsets are stored as i32, so the radius must fit one.
    let r = i32::try_from(radius).map_err(|_| SfegoError::InvalidRadius(radius))?;
    let side = (radius as usize)
        .checked_mul(2)
        .and_then(|d| d.checked_add(1))
        .ok_or(SfegoError::InvalidRadius(radius))?;
    let candidates = side.checked_mul(side).ok_or(SfegoError::InvalidRadius(radius))?;
    let mut offsets: Vec<NeighborOffset> = Vec::new();
    offsets
        .try_reserve_exact(candidates)
        .map_err(|_| SfegoError::InvalidRadius(radius))?;

    let limit = radius as f64 + 1.0;
    for i in -r..=r {
        for j in -r..=r {
            if i == 0 && j == 0 {
                continue;
            }
            let (di, dj) = (i as i64, j as i64);
            let distance = ((di * di + dj * dj) as f64).sqrt();
            if distance >= limit {
                continue;
            }
            let mut angle = (j as f64).atan2(i as f64);
            if angle < 0.0 {
                angle += TAU;
            }
            offsets.push(NeighborOffset { dx: j, dy: i, angle, distance });
        }
    }

    // `sort_by` is stable: equal keys keep row-major enumeration order.
    offsets.sort_by(|a, b| {
        a.angle
            .partial_cmp(&b.angle)
            .unwrap_or(Ordering::Equal)
            .then(a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
    });

    Ok(NeighborList { radius, offsets })
}
