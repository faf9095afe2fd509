// pipeline.rs - Host orchestration of one SFEGO invocation.
//
// STAGE SEQUENCE
// ──────────────
//   1. build_neighbor_list(radius)
//   2. acquire buffer set          (pool hit, or kernel.allocate)
//   3. upload neighbors + image    (neighbors skipped if already resident)
//   4. gradient stage
//   5. barrier                     whole grid, not per block
//   6. integral stage
//   7. download raw result
//   8. normalise by L, reshape to the input's width × height
//
// Strictly linear; any error returns immediately. The buffer lease is
// committed only after step 7 succeeds, so a failed invocation never puts
// a half-written set back into the pool. Dropping the lease on the error
// path releases the memory.

use tracing::{debug, debug_span};

use crate::dispatch::{BlockSize, Launch};
use crate::error::{Result, SfegoError};
use crate::image::{Image, Sample};
use crate::kernel::cpu::CpuKernel;
use crate::kernel::{BoundaryPolicy, DeviceBuffers, StencilKernel};
use crate::neighbor::build_neighbor_list;
use crate::pool::{BufferPool, PoolKey, PoolStats};
use crate::response::normalize_response;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfegoConfig {
    /// Workers per dispatch block.
    pub block: BlockSize,
    /// Out-of-bounds neighbor read policy for both stages.
    pub boundary: BoundaryPolicy,
    /// Idle buffer sets kept for reuse. 0 disables pooling.
    pub pool_capacity: usize,
}

impl Default for SfegoConfig {
    fn default() -> Self {
        SfegoConfig {
            block: BlockSize::default(),
            boundary: BoundaryPolicy::Clamp,
            pool_capacity: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// SfegoPipeline
// ---------------------------------------------------------------------------

/// A compute kernel plus the buffer pool that feeds it.
///
/// Create once per process and call [`SfegoPipeline::compute`] for each
/// (image, radius) pair.
pub struct SfegoPipeline<K: StencilKernel> {
    // Pooled buffers drop before the kernel that owns the device.
    pool: BufferPool<K::Buffers>,
    kernel: K,
    config: SfegoConfig,
}

impl SfegoPipeline<CpuKernel> {
    /// Pipeline on the host reference kernel with default configuration.
    pub fn cpu() -> Self {
        // The default block always validates against the CPU kernel.
        SfegoPipeline {
            pool: BufferPool::new(SfegoConfig::default().pool_capacity),
            kernel: CpuKernel,
            config: SfegoConfig::default(),
        }
    }
}

impl<K: StencilKernel> SfegoPipeline<K> {
    /// Wrap `kernel`, validating the block size against its limits.
    pub fn new(kernel: K, config: SfegoConfig) -> Result<Self> {
        kernel.validate_block(config.block)?;
        debug!(
            kernel = kernel.name(),
            block = %config.block,
            boundary = %config.boundary,
            pool_capacity = config.pool_capacity,
            "sfego pipeline ready"
        );
        Ok(SfegoPipeline { pool: BufferPool::new(config.pool_capacity), kernel, config })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn config(&self) -> &SfegoConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Release every idle pooled buffer set.
    pub fn release_pool(&self) {
        self.pool.clear();
    }

    /// Compute the normalised SFEGO response of `image` at `radius`.
    ///
    /// The output has the same width and height as the input.
    ///
    /// # Errors
    /// - [`SfegoError::InvalidRadius`] for `radius == 0`.
    /// - [`SfegoError::EmptyImage`] if either axis is zero.
    /// - Allocation/transfer errors from the kernel.
    pub fn compute<T: Sample>(&self, image: &Image<T>, radius: u32) -> Result<Image<f32>> {
        let (width, height) = image.dimensions();
        let _span = debug_span!("sfego", kernel = self.kernel.name(), radius, width, height).entered();

        let neighbors = build_neighbor_list(radius)?;
        let launch = Launch::new(width, height, self.config.block)?;
        debug!(neighbors = neighbors.len(), %launch, "launch geometry");

        let samples: Vec<f32> = image.as_slice().iter().map(|v| v.to_f32()).collect();

        let key = PoolKey { radius, width, height };
        let mut lease = self
            .pool
            .acquire(key, || self.kernel.allocate(launch.pixel_count(), neighbors.len()))?;

        if lease.pixel_count() != launch.pixel_count() || lease.neighbor_count() != neighbors.len() {
            return Err(SfegoError::ShapeMismatch {
                what: "pooled buffer set",
                expected: launch.pixel_count(),
                actual: lease.pixel_count(),
            });
        }

        if lease.resident_radius() != Some(radius) {
            self.kernel.upload_neighbors(&mut lease, &neighbors)?;
        }
        self.kernel.upload_image(&mut lease, &samples)?;

        self.kernel.gradient(&mut lease, &launch, self.config.boundary)?;
        self.kernel.barrier(&mut lease)?;
        self.kernel.integral(&mut lease, &launch, self.config.boundary)?;
        let raw = self.kernel.download_result(&mut lease)?;
        lease.commit();

        normalize_response(raw, neighbors.len(), width, height)
    }
}

/// Compute the SFEGO response on the host reference kernel.
///
/// Convenience wrapper that builds a one-shot [`SfegoPipeline`]; create a
/// pipeline directly to reuse buffers across calls or to run on the GPU.
pub fn compute_sfego<T: Sample>(image: &Image<T>, radius: u32) -> Result<Image<f32>> {
    SfegoPipeline::new(CpuKernel, SfegoConfig { pool_capacity: 0, ..SfegoConfig::default() })?
        .compute(image, radius)
}
