// sfego: Spatial Frequency Edge Gradient Orientation response maps
//
// Two-stage stencil over a 2D image: a circular-neighborhood gradient
// (magnitude + direction), then a directional integral of that gradient
// field. Runs on the host (rayon) or on a wgpu compute device.

pub mod error;
pub mod image;
pub mod neighbor;
pub mod dispatch;
pub mod kernel;
pub mod pool;
pub mod pipeline;
pub mod response;
pub mod scale;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use dispatch::{BlockSize, GridSize, Launch};
pub use error::{Result, SfegoError};
pub use image::{Image, Sample};
pub use kernel::cpu::CpuKernel;
pub use kernel::{BoundaryPolicy, StencilKernel};
pub use neighbor::{build_neighbor_list, NeighborList, NeighborOffset};
pub use pipeline::{compute_sfego, SfegoConfig, SfegoPipeline};
pub use response::{normalize_response, to_display_u8};
pub use scale::{artifact_name, parse_scale_records, run_scale, ScaleRecord};
