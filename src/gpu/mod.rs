// gpu/mod.rs - wgpu backend for the SFEGO stencil.
//
// `GpuKernel` implements the same `StencilKernel` contract as the host
// reference kernel in kernel/cpu.rs and is validated against it in the
// ignored GPU tests. Device bring-up lives in `device`; the WGSL source is
// shaders/sfego.wgsl.
//
// Enabled by the `gpu` cargo feature (on by default).

pub mod device;
pub mod kernel;

pub use device::{AdapterInfo, GpuConfig, GpuDevice};
pub use kernel::{GpuBuffers, GpuKernel};
