// kernel/cpu.rs - Host reference kernel (rayon).
//
// Executes the same block/grid launch as the GPU kernel. A block row (all
// blocks sharing one `by`) covers `block.y` consecutive image rows, which is
// one contiguous chunk of every per-pixel field. Block rows run in parallel
// via `par_chunks_mut`; blocks within a row and pixels within a block run in
// order. Every worker writes only its own pixel, so the chunks are disjoint
// and no locking is needed.
//
// BARRIER
// ───────
// `par_chunks_mut(..).for_each(..)` returns only after every chunk has been
// processed, so all gradient writes are complete by the time `gradient`
// returns. `barrier` has nothing left to wait for; it only checks that the
// gradient stage actually ran for this buffer set.
//
// ALLOCATION
// ──────────
// Buffers are reserved with `try_reserve_exact`, so an allocation the
// system cannot satisfy surfaces as `SfegoError::Allocation` instead of
// aborting the process.

use rayon::prelude::*;
use tracing::trace;

use crate::dispatch::{BlockSize, Launch};
use crate::error::{Result, SfegoError};
use crate::kernel::{gradient_at, integral_at, BoundaryPolicy, DeviceBuffers, NeighborView, StencilKernel};
use crate::neighbor::NeighborList;

/// Host memory for one invocation.
pub struct CpuBuffers {
    image: Vec<f32>,
    difference: Vec<f32>,
    direction: Vec<f32>,
    result: Vec<f32>,
    dx: Vec<i32>,
    dy: Vec<i32>,
    angle: Vec<f32>,
    resident_radius: Option<u32>,
    gradient_done: bool,
}

impl CpuBuffers {
    /// Difference field written by the last gradient stage.
    pub fn difference(&self) -> &[f32] {
        &self.difference
    }

    /// Direction field written by the last gradient stage.
    pub fn direction(&self) -> &[f32] {
        &self.direction
    }
}

impl DeviceBuffers for CpuBuffers {
    fn pixel_count(&self) -> usize {
        self.image.len()
    }

    fn neighbor_count(&self) -> usize {
        self.dx.len()
    }

    fn resident_radius(&self) -> Option<u32> {
        self.resident_radius
    }
}

/// Reference kernel running on the host thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuKernel;

impl CpuKernel {
    pub fn new() -> Self {
        CpuKernel
    }
}

/// Allocate a zeroed vector, reporting failure instead of aborting.
fn try_zeroed<T: Copy + Default>(what: &'static str, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|e| SfegoError::Allocation {
        what,
        bytes: (len * std::mem::size_of::<T>()) as u64,
        reason: e.to_string(),
    })?;
    v.resize(len, T::default());
    Ok(v)
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SfegoError::ShapeMismatch { what, expected, actual });
    }
    Ok(())
}

impl StencilKernel for CpuKernel {
    type Buffers = CpuBuffers;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn validate_block(&self, block: BlockSize) -> Result<()> {
        // Blocks only partition work on the host; any non-zero size runs.
        block.validate(u32::MAX)
    }

    fn allocate(&self, pixel_count: usize, neighbor_count: usize) -> Result<CpuBuffers> {
        trace!(pixel_count, neighbor_count, "cpu: allocating buffer set");
        Ok(CpuBuffers {
            image: try_zeroed("image", pixel_count)?,
            difference: try_zeroed("difference", pixel_count)?,
            direction: try_zeroed("direction", pixel_count)?,
            result: try_zeroed("result", pixel_count)?,
            dx: try_zeroed("neighbor dx", neighbor_count)?,
            dy: try_zeroed("neighbor dy", neighbor_count)?,
            angle: try_zeroed("neighbor angle", neighbor_count)?,
            resident_radius: None,
            gradient_done: false,
        })
    }

    fn upload_neighbors(&self, buffers: &mut CpuBuffers, neighbors: &NeighborList) -> Result<()> {
        check_len("neighbor arrays", buffers.dx.len(), neighbors.len())?;
        for (k, o) in neighbors.iter().enumerate() {
            buffers.dx[k] = o.dx;
            buffers.dy[k] = o.dy;
            buffers.angle[k] = o.angle as f32;
        }
        buffers.resident_radius = Some(neighbors.radius());
        Ok(())
    }

    fn upload_image(&self, buffers: &mut CpuBuffers, image: &[f32]) -> Result<()> {
        check_len("image upload", buffers.image.len(), image.len())?;
        buffers.image.copy_from_slice(image);
        buffers.gradient_done = false;
        Ok(())
    }

    fn gradient(&self, buffers: &mut CpuBuffers, launch: &Launch, boundary: BoundaryPolicy) -> Result<()> {
        check_len("gradient launch", buffers.image.len(), launch.pixel_count())?;
        let w = launch.width as usize;
        let h = launch.height as usize;
        let rows_per_block = launch.block.y as usize;
        let chunk = w * rows_per_block;

        let CpuBuffers { image, difference, direction, dx, dy, angle, .. } = &mut *buffers;
        let image: &[f32] = image;
        let nb = NeighborView { dx, dy, angle };

        difference
            .par_chunks_mut(chunk)
            .zip(direction.par_chunks_mut(chunk))
            .enumerate()
            .for_each(|(by, (diff_rows, dir_rows))| {
                for bx in 0..launch.grid.x {
                    let (x0, y0, x1, y1) = launch.block_bounds(bx, by as u32);
                    for y in y0 as usize..y1 as usize {
                        let local = (y - y0 as usize) * w;
                        for x in x0 as usize..x1 as usize {
                            let (d, a) = gradient_at(image, w, h, x, y, nb, boundary);
                            diff_rows[local + x] = d;
                            dir_rows[local + x] = a;
                        }
                    }
                }
            });

        buffers.gradient_done = true;
        Ok(())
    }

    fn barrier(&self, buffers: &mut CpuBuffers) -> Result<()> {
        if !buffers.gradient_done {
            return Err(SfegoError::Transfer {
                stage: "barrier",
                reason: "gradient stage has not run for this buffer set".to_string(),
            });
        }
        Ok(())
    }

    fn integral(&self, buffers: &mut CpuBuffers, launch: &Launch, boundary: BoundaryPolicy) -> Result<()> {
        check_len("integral launch", buffers.result.len(), launch.pixel_count())?;
        let w = launch.width as usize;
        let h = launch.height as usize;
        let chunk = w * launch.block.y as usize;

        let CpuBuffers { difference, direction, result, dx, dy, angle, .. } = &mut *buffers;
        let difference: &[f32] = difference;
        let direction: &[f32] = direction;
        let nb = NeighborView { dx, dy, angle };

        result.par_chunks_mut(chunk).enumerate().for_each(|(by, out_rows)| {
            for bx in 0..launch.grid.x {
                let (x0, y0, x1, y1) = launch.block_bounds(bx, by as u32);
                for y in y0 as usize..y1 as usize {
                    let local = (y - y0 as usize) * w;
                    for x in x0 as usize..x1 as usize {
                        out_rows[local + x] =
                            integral_at(difference, direction, w, h, x, y, nb, boundary);
                    }
                }
            }
        });

        Ok(())
    }

    fn download_result(&self, buffers: &mut CpuBuffers) -> Result<Vec<f32>> {
        Ok(buffers.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::build_neighbor_list;

    fn run(kernel: &CpuKernel, img: &[f32], w: usize, h: usize, r: u32, block: BlockSize) -> Vec<f32> {
        let list = build_neighbor_list(r).unwrap();
        let launch = Launch::new(w, h, block).unwrap();
        let mut bufs = kernel.allocate(w * h, list.len()).unwrap();
        kernel.upload_neighbors(&mut bufs, &list).unwrap();
        kernel.upload_image(&mut bufs, img).unwrap();
        kernel.gradient(&mut bufs, &launch, BoundaryPolicy::Clamp).unwrap();
        kernel.barrier(&mut bufs).unwrap();
        kernel.integral(&mut bufs, &launch, BoundaryPolicy::Clamp).unwrap();
        kernel.download_result(&mut bufs).unwrap()
    }

    fn sequential(img: &[f32], w: usize, h: usize, r: u32) -> Vec<f32> {
        let arrays = build_neighbor_list(r).unwrap().to_arrays();
        let nb = NeighborView { dx: &arrays.dx, dy: &arrays.dy, angle: &arrays.angle };
        let mut diff = vec![0.0; w * h];
        let mut dir = vec![0.0; w * h];
        for y in 0..h {
            for x in 0..w {
                let (d, a) = gradient_at(img, w, h, x, y, nb, BoundaryPolicy::Clamp);
                diff[y * w + x] = d;
                dir[y * w + x] = a;
            }
        }
        (0..w * h)
            .map(|i| integral_at(&diff, &dir, w, h, i % w, i / w, nb, BoundaryPolicy::Clamp))
            .collect()
    }

    fn noise(w: usize, h: usize) -> Vec<f32> {
        let mut rng = 12345u32;
        (0..w * h)
            .map(|_| {
                rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                (rng >> 24) as f32
            })
            .collect()
    }

    #[test]
    fn test_block_partition_matches_sequential() {
        // 37×21 leaves partial blocks on both axes.
        let (w, h) = (37, 21);
        let img = noise(w, h);
        let expected = sequential(&img, w, h, 2);
        let got = run(&CpuKernel, &img, w, h, 2, BlockSize::default());
        assert_eq!(got, expected);
    }

    #[test]
    fn test_block_size_does_not_change_result() {
        let (w, h) = (30, 19);
        let img = noise(w, h);
        let a = run(&CpuKernel, &img, w, h, 3, BlockSize::new(16, 16).unwrap());
        let b = run(&CpuKernel, &img, w, h, 3, BlockSize::new(4, 7).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_barrier_before_gradient_fails() {
        let mut bufs = CpuKernel.allocate(16, 8).unwrap();
        assert!(matches!(CpuKernel.barrier(&mut bufs), Err(SfegoError::Transfer { .. })));
    }

    #[test]
    fn test_upload_wrong_size_rejected() {
        let mut bufs = CpuKernel.allocate(16, 8).unwrap();
        let err = CpuKernel.upload_image(&mut bufs, &[0.0; 15]).unwrap_err();
        assert!(matches!(err, SfegoError::ShapeMismatch { expected: 16, actual: 15, .. }));
    }

    #[test]
    fn test_resident_radius_tracked() {
        let list = build_neighbor_list(2).unwrap();
        let mut bufs = CpuKernel.allocate(4, list.len()).unwrap();
        assert_eq!(bufs.resident_radius(), None);
        CpuKernel.upload_neighbors(&mut bufs, &list).unwrap();
        assert_eq!(bufs.resident_radius(), Some(2));
    }
}
