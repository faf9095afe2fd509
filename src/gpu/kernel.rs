// gpu/kernel.rs - wgpu implementation of the two-stage stencil.
//
// BUFFER SET
// ──────────
// One `GpuBuffers` per (radius, width, height):
//
//   image, difference, direction, result    f32 × pixel_count   STORAGE
//   dx, dy                                  i32 × L             STORAGE
//   angle                                   f32 × L             STORAGE
//   params                                  16 B                UNIFORM
//   readback                                f32 × pixel_count   MAP_READ
//
// plus the bind group over all eight bindings. The bind group is built once at
// allocation, since the buffers never move. Dropping the set destroys every
// buffer immediately rather than waiting for wgpu's deferred cleanup.
//
// STAGE ORDERING
// ──────────────
// The gradient and integral passes are separate queue submissions:
//
//   gradient()  write params, submit pass 1           → SubmissionIndex
//   barrier()   device.poll(WaitForSubmissionIndex)   whole grid done
//   integral()  write params, submit pass 2 + copy result → readback
//   download()  map readback, poll, copy out
//
// Splitting the submissions makes the barrier explicit on the host. No
// workgroup of pass 2 can start before every workgroup of pass 1 finished.
//
// ERROR SURFACING
// ───────────────
// wgpu reports allocation and validation failures through the device's
// uncaptured-error handler, which panics by default. Every call that can fail
// is wrapped in push_error_scope / pop_error_scope and turned into an
// `SfegoError` instead.

use std::iter;

use tracing::{debug, trace};

use crate::dispatch::{BlockSize, Launch};
use crate::error::{Result, SfegoError};
use crate::gpu::device::GpuDevice;
use crate::kernel::{BoundaryPolicy, DeviceBuffers, StencilKernel};
use crate::neighbor::NeighborList;

const SHADER_TEMPLATE: &str = include_str!("../shaders/sfego.wgsl");

// ---------------------------------------------------------------------------
// Uniform params (must match WGSL struct StencilParams exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct StencilParams {
    width: u32,
    height: u32,
    neighbor_count: u32,
    boundary: u32,
}

/// Shader source with the block size substituted in.
fn shader_source(block: BlockSize) -> String {
    SHADER_TEMPLATE
        .replace("{{WG_X}}", &block.x.to_string())
        .replace("{{WG_Y}}", &block.y.to_string())
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// ---------------------------------------------------------------------------
// GpuBuffers
// ---------------------------------------------------------------------------

/// Device memory for one SFEGO invocation.
pub struct GpuBuffers {
    image: wgpu::Buffer,
    difference: wgpu::Buffer,
    direction: wgpu::Buffer,
    result: wgpu::Buffer,
    dx: wgpu::Buffer,
    dy: wgpu::Buffer,
    angle: wgpu::Buffer,
    params: wgpu::Buffer,
    readback: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    pixel_count: usize,
    neighbor_count: usize,
    resident_radius: Option<u32>,
    gradient_submission: Option<wgpu::SubmissionIndex>,
    gradient_done: bool,
    result_ready: bool,
}

impl GpuBuffers {
    fn field_bytes(&self) -> u64 {
        (self.pixel_count * std::mem::size_of::<f32>()) as u64
    }
}

impl DeviceBuffers for GpuBuffers {
    fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    fn neighbor_count(&self) -> usize {
        self.neighbor_count
    }

    fn resident_radius(&self) -> Option<u32> {
        self.resident_radius
    }
}

impl Drop for GpuBuffers {
    fn drop(&mut self) {
        for buf in [
            &self.image,
            &self.difference,
            &self.direction,
            &self.result,
            &self.dx,
            &self.dy,
            &self.angle,
            &self.params,
            &self.readback,
        ] {
            buf.destroy();
        }
    }
}

// ---------------------------------------------------------------------------
// GpuKernel
// ---------------------------------------------------------------------------

/// SFEGO on a wgpu device.
///
/// The block size is compiled into the shader, so a kernel only accepts
/// launches with the block it was built for.
pub struct GpuKernel {
    block: BlockSize,
    bgl: wgpu::BindGroupLayout,
    gradient_pipeline: wgpu::ComputePipeline,
    integral_pipeline: wgpu::ComputePipeline,
    // Declared last: pipelines and layouts go before the device.
    gpu: GpuDevice,
}

impl GpuKernel {
    /// Compile both entry points for `block` on `gpu`.
    ///
    /// # Errors
    /// [`SfegoError::InvalidBlockSize`] if the device cannot run blocks of
    /// that shape, [`SfegoError::KernelInit`] if shader or pipeline creation
    /// is rejected.
    pub fn new(gpu: GpuDevice, block: BlockSize) -> Result<Self> {
        block.validate(gpu.limits.max_compute_invocations_per_workgroup)?;
        if block.x > gpu.limits.max_compute_workgroup_size_x
            || block.y > gpu.limits.max_compute_workgroup_size_y
        {
            return Err(SfegoError::InvalidBlockSize {
                x: block.x,
                y: block.y,
                reason: format!(
                    "device allows at most {}×{} per block",
                    gpu.limits.max_compute_workgroup_size_x, gpu.limits.max_compute_workgroup_size_y
                ),
            });
        }

        let device = &gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sfego.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_source(block).into()),
        });

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuSfego BGL"),
            entries: &[
                storage_entry(0, true),  // image
                storage_entry(1, false), // difference
                storage_entry(2, false), // direction
                storage_entry(3, false), // result
                storage_entry(4, true),  // dx
                storage_entry(5, true),  // dy
                storage_entry(6, true),  // angle
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GpuSfego pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry_point: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let gradient_pipeline = make_pipeline("sfego_gradient");
        let integral_pipeline = make_pipeline("sfego_integral");

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(SfegoError::KernelInit(e.to_string()));
        }

        debug!(adapter = %gpu.adapter_info, %block, "sfego shaders compiled");
        Ok(GpuKernel { block, bgl, gradient_pipeline, integral_pipeline, gpu })
    }

    pub fn gpu(&self) -> &GpuDevice {
        &self.gpu
    }

    pub fn block(&self) -> BlockSize {
        self.block
    }

    fn check_launch(&self, buffers: &GpuBuffers, launch: &Launch) -> Result<()> {
        if launch.block != self.block {
            return Err(SfegoError::InvalidBlockSize {
                x: launch.block.x,
                y: launch.block.y,
                reason: format!("kernel was compiled for {}", self.block),
            });
        }
        let max_groups = self.gpu.limits.max_compute_workgroups_per_dimension;
        if launch.grid.x > max_groups || launch.grid.y > max_groups {
            return Err(SfegoError::InvalidBlockSize {
                x: launch.block.x,
                y: launch.block.y,
                reason: format!(
                    "grid {}×{} exceeds the device limit of {max_groups} blocks per axis",
                    launch.grid.x, launch.grid.y
                ),
            });
        }
        if launch.pixel_count() != buffers.pixel_count {
            return Err(SfegoError::ShapeMismatch {
                what: "launch grid",
                expected: buffers.pixel_count,
                actual: launch.pixel_count(),
            });
        }
        Ok(())
    }

    fn write_params(&self, buffers: &GpuBuffers, launch: &Launch, boundary: BoundaryPolicy) {
        let params = StencilParams {
            width: launch.width,
            height: launch.height,
            neighbor_count: buffers.neighbor_count as u32,
            boundary: boundary.code(),
        };
        self.gpu.queue.write_buffer(&buffers.params, 0, bytemuck::bytes_of(&params));
    }

    /// Encode and submit one stage. The integral stage also copies the result
    /// into the readback buffer in the same submission.
    fn submit_stage(
        &self,
        buffers: &GpuBuffers,
        pipeline: &wgpu::ComputePipeline,
        launch: &Launch,
        stage: &'static str,
        copy_result: bool,
    ) -> Result<wgpu::SubmissionIndex> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(stage) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(stage),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(launch.grid.x, launch.grid.y, 1);
        }
        if copy_result {
            encoder.copy_buffer_to_buffer(&buffers.result, 0, &buffers.readback, 0, buffers.field_bytes());
        }
        let index = self.gpu.queue.submit(iter::once(encoder.finish()));

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(SfegoError::Transfer { stage, reason: e.to_string() });
        }
        trace!(stage, grid_x = launch.grid.x, grid_y = launch.grid.y, "stage submitted");
        Ok(index)
    }

    fn write_checked(&self, stage: &'static str, buffer: &wgpu::Buffer, bytes: &[u8]) -> Result<()> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.gpu.queue.write_buffer(buffer, 0, bytes);
        match pollster::block_on(device.pop_error_scope()) {
            Some(e) => Err(SfegoError::Transfer { stage, reason: e.to_string() }),
            None => Ok(()),
        }
    }
}

impl StencilKernel for GpuKernel {
    type Buffers = GpuBuffers;

    fn name(&self) -> &'static str {
        "gpu"
    }

    fn validate_block(&self, block: BlockSize) -> Result<()> {
        if block != self.block {
            return Err(SfegoError::InvalidBlockSize {
                x: block.x,
                y: block.y,
                reason: format!("kernel was compiled for {}", self.block),
            });
        }
        Ok(())
    }

    fn allocate(&self, pixel_count: usize, neighbor_count: usize) -> Result<GpuBuffers> {
        if pixel_count == 0 || neighbor_count == 0 {
            return Err(SfegoError::ShapeMismatch {
                what: "buffer set",
                expected: 1,
                actual: pixel_count.min(neighbor_count),
            });
        }

        let field_bytes = (pixel_count * std::mem::size_of::<f32>()) as u64;
        let list_bytes = (neighbor_count * std::mem::size_of::<i32>()) as u64;
        let params_bytes = std::mem::size_of::<StencilParams>() as u64;
        let total = 5 * field_bytes + 3 * list_bytes + params_bytes;

        let max = self.gpu.max_binding_bytes();
        if field_bytes > max {
            return Err(SfegoError::Allocation {
                what: "per-pixel field",
                bytes: field_bytes,
                reason: format!("exceeds the device binding limit of {max} bytes"),
            });
        }

        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let storage = |label: &'static str, size: u64, extra: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | extra,
                mapped_at_creation: false,
            })
        };
        let image = storage("sfego image", field_bytes, wgpu::BufferUsages::COPY_DST);
        let difference = storage("sfego difference", field_bytes, wgpu::BufferUsages::empty());
        let direction = storage("sfego direction", field_bytes, wgpu::BufferUsages::empty());
        let result = storage("sfego result", field_bytes, wgpu::BufferUsages::COPY_SRC);
        let dx = storage("sfego dx", list_bytes, wgpu::BufferUsages::COPY_DST);
        let dy = storage("sfego dy", list_bytes, wgpu::BufferUsages::COPY_DST);
        let angle = storage("sfego angle", list_bytes, wgpu::BufferUsages::COPY_DST);
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sfego params"),
            size: params_bytes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sfego readback"),
            size: field_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuSfego BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: image.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: difference.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: direction.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: result.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: dx.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: dy.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: angle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: params.as_entire_binding() },
            ],
        });

        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());

        let buffers = GpuBuffers {
            image,
            difference,
            direction,
            result,
            dx,
            dy,
            angle,
            params,
            readback,
            bind_group,
            pixel_count,
            neighbor_count,
            resident_radius: None,
            gradient_submission: None,
            gradient_done: false,
            result_ready: false,
        };

        // On failure `buffers` drops here and destroys whatever was created.
        if let Some(e) = oom.or(validation) {
            return Err(SfegoError::Allocation { what: "buffer set", bytes: total, reason: e.to_string() });
        }
        trace!(pixel_count, neighbor_count, bytes = total, "gpu buffer set allocated");
        Ok(buffers)
    }

    fn upload_neighbors(&self, buffers: &mut GpuBuffers, neighbors: &NeighborList) -> Result<()> {
        if neighbors.len() != buffers.neighbor_count {
            return Err(SfegoError::ShapeMismatch {
                what: "neighbor upload",
                expected: buffers.neighbor_count,
                actual: neighbors.len(),
            });
        }
        let arrays = neighbors.to_arrays();
        buffers.resident_radius = None;
        self.write_checked("neighbor upload", &buffers.dx, bytemuck::cast_slice(&arrays.dx))?;
        self.write_checked("neighbor upload", &buffers.dy, bytemuck::cast_slice(&arrays.dy))?;
        self.write_checked("neighbor upload", &buffers.angle, bytemuck::cast_slice(&arrays.angle))?;
        buffers.resident_radius = Some(neighbors.radius());
        Ok(())
    }

    fn upload_image(&self, buffers: &mut GpuBuffers, image: &[f32]) -> Result<()> {
        if image.len() != buffers.pixel_count {
            return Err(SfegoError::ShapeMismatch {
                what: "image upload",
                expected: buffers.pixel_count,
                actual: image.len(),
            });
        }
        self.write_checked("image upload", &buffers.image, bytemuck::cast_slice(image))
    }

    fn gradient(&self, buffers: &mut GpuBuffers, launch: &Launch, boundary: BoundaryPolicy) -> Result<()> {
        self.check_launch(buffers, launch)?;
        buffers.gradient_done = false;
        buffers.result_ready = false;
        self.write_params(buffers, launch, boundary);
        let index = self.submit_stage(buffers, &self.gradient_pipeline, launch, "sfego_gradient", false)?;
        buffers.gradient_submission = Some(index);
        Ok(())
    }

    fn barrier(&self, buffers: &mut GpuBuffers) -> Result<()> {
        let Some(index) = buffers.gradient_submission.take() else {
            return Err(SfegoError::Transfer {
                stage: "barrier",
                reason: "gradient stage has not been submitted".to_string(),
            });
        };
        self.gpu.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        buffers.gradient_done = true;
        Ok(())
    }

    fn integral(&self, buffers: &mut GpuBuffers, launch: &Launch, boundary: BoundaryPolicy) -> Result<()> {
        if !buffers.gradient_done {
            return Err(SfegoError::Transfer {
                stage: "sfego_integral",
                reason: "barrier has not completed the gradient stage".to_string(),
            });
        }
        self.check_launch(buffers, launch)?;
        self.write_params(buffers, launch, boundary);
        self.submit_stage(buffers, &self.integral_pipeline, launch, "sfego_integral", true)?;
        buffers.gradient_done = false;
        buffers.result_ready = true;
        Ok(())
    }

    fn download_result(&self, buffers: &mut GpuBuffers) -> Result<Vec<f32>> {
        if !buffers.result_ready {
            return Err(SfegoError::Transfer {
                stage: "readback",
                reason: "integral stage has not been submitted".to_string(),
            });
        }
        buffers.result_ready = false;

        let slice = buffers.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives the poll below; a failed send means the
            // caller already returned.
            let _ = sender.send(result);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| SfegoError::Transfer { stage: "readback", reason: e.to_string() })?
            .map_err(|e| SfegoError::Transfer { stage: "readback", reason: e.to_string() })?;

        let out = {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&mapped).to_vec()
        };
        buffers.readback.unmap();
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
