// error.rs - Crate-wide error type.
//
// Three families, matching how far a failure reaches:
//
//   Initialization   NoSuitableAdapter, DeviceRequest, KernelInit
//                    The compute kernel cannot be brought up at all. Fatal
//                    before any image is processed.
//
//   Configuration    ScaleRecord
//                    One scale/radius record is malformed. Fails that record.
//
//   Invocation       InvalidRadius, EmptyImage, InvalidBlockSize,
//                    ShapeMismatch, Allocation, Transfer
//                    Fatal for the current pipeline invocation. Buffers are
//                    released by their owners' Drop impls on the way out.

use thiserror::Error;

/// Errors produced by the SFEGO pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum SfegoError {
    /// The neighbor list needs a radius of at least 1 whose disk can be
    /// enumerated with i32 offsets in memory.
    #[error("invalid neighbor radius {0}: must be >= 1 and small enough to enumerate")]
    InvalidRadius(u32),

    /// A zero-sized axis would produce an empty dispatch grid.
    #[error("image must be non-empty (got {width}×{height})")]
    EmptyImage { width: usize, height: usize },

    /// Block dimensions must be non-zero and fit the kernel's invocation limit.
    #[error("invalid block size {x}×{y}: {reason}")]
    InvalidBlockSize { x: u32, y: u32, reason: String },

    /// A buffer handed to a stage does not match the invocation's shape.
    #[error("{what}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Device (or host) memory for one of the per-invocation buffers could
    /// not be obtained.
    #[error("failed to allocate {what} ({bytes} bytes): {reason}")]
    Allocation {
        what: &'static str,
        bytes: u64,
        reason: String,
    },

    /// An upload, dispatch or readback did not complete.
    #[error("device transfer failed during {stage}: {reason}")]
    Transfer { stage: &'static str, reason: String },

    /// No adapter passed the selection filter in `GpuConfig`.
    #[error("no suitable GPU adapter found for backends {backends}")]
    NoSuitableAdapter { backends: String },

    /// The adapter refused the device request.
    #[error("device request failed: {0}")]
    DeviceRequest(String),

    /// Shader module or pipeline creation was rejected by the device.
    #[error("compute kernel initialisation failed: {0}")]
    KernelInit(String),

    /// A scale record line could not be parsed.
    #[error("scale record on line {line}: {reason}")]
    ScaleRecord { line: usize, reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SfegoError>;
