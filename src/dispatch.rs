// dispatch.rs - Block/grid geometry for per-pixel stencil launches.
//
// Both stages launch one logical worker per output pixel, grouped into
// fixed-size 2D blocks. The grid covers the image with ceiling division:
//
//   blocks_x = floor(width  / block.x) + (width  % block.x != 0)
//   blocks_y = floor(height / block.y) + (height % block.y != 0)
//
// The last block on each axis may hang past the image edge; workers there
// must check `x < width && y < height` and return without writing.
//
// A zero-sized axis is an error rather than a zero-block grid. An empty
// dispatch would "succeed" while producing nothing, and the normaliser would
// then reshape an empty buffer into a field that never existed.

use std::fmt;

use crate::error::{Result, SfegoError};

/// Workers per block along x and y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize {
    pub x: u32,
    pub y: u32,
}

impl BlockSize {
    /// Build a block size, rejecting zero dimensions.
    pub fn new(x: u32, y: u32) -> Result<Self> {
        if x == 0 || y == 0 {
            return Err(SfegoError::InvalidBlockSize {
                x,
                y,
                reason: "block dimensions must be non-zero".to_string(),
            });
        }
        Ok(BlockSize { x, y })
    }

    /// Workers per block (x * y).
    #[inline]
    pub fn total(&self) -> u32 {
        self.x.saturating_mul(self.y)
    }

    /// Check against a kernel's per-block invocation limit.
    pub fn validate(&self, max_invocations: u32) -> Result<()> {
        if self.x == 0 || self.y == 0 {
            return Err(SfegoError::InvalidBlockSize {
                x: self.x,
                y: self.y,
                reason: "block dimensions must be non-zero".to_string(),
            });
        }
        if self.total() > max_invocations {
            return Err(SfegoError::InvalidBlockSize {
                x: self.x,
                y: self.y,
                reason: format!(
                    "{} invocations exceeds the kernel limit of {max_invocations}",
                    self.total()
                ),
            });
        }
        Ok(())
    }
}

impl Default for BlockSize {
    /// 16×16, the reference block configuration.
    fn default() -> Self {
        BlockSize { x: 16, y: 16 }
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} workers)", self.x, self.y, self.total())
    }
}

/// Number of blocks along x and y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub x: u32,
    pub y: u32,
}

impl GridSize {
    #[inline]
    pub fn total(&self) -> u32 {
        self.x.saturating_mul(self.y)
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} blocks", self.x, self.y)
    }
}

/// Blocks needed to cover `size` workers with blocks of `block` workers.
///
/// # Errors
/// [`SfegoError::EmptyImage`] when `size == 0`; the width slot carries the
/// offending size.
pub fn blocks_for(size: u32, block: u32) -> Result<u32> {
    if size == 0 {
        return Err(SfegoError::EmptyImage { width: 0, height: 0 });
    }
    if block == 0 {
        return Err(SfegoError::InvalidBlockSize {
            x: block,
            y: block,
            reason: "block dimensions must be non-zero".to_string(),
        });
    }
    Ok(size / block + u32::from(size % block != 0))
}

/// Everything a stage needs to launch over one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub width: u32,
    pub height: u32,
    pub block: BlockSize,
    pub grid: GridSize,
}

impl Launch {
    /// Compute the launch geometry for a `width × height` field.
    ///
    /// # Errors
    /// [`SfegoError::EmptyImage`] if either axis is zero,
    /// [`SfegoError::InvalidBlockSize`] if the block has a zero axis.
    pub fn new(width: usize, height: usize, block: BlockSize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SfegoError::EmptyImage { width, height });
        }
        let w = u32::try_from(width).map_err(|_| SfegoError::ShapeMismatch {
            what: "image width",
            expected: u32::MAX as usize,
            actual: width,
        })?;
        let h = u32::try_from(height).map_err(|_| SfegoError::ShapeMismatch {
            what: "image height",
            expected: u32::MAX as usize,
            actual: height,
        })?;
        if block.x == 0 || block.y == 0 {
            return Err(SfegoError::InvalidBlockSize {
                x: block.x,
                y: block.y,
                reason: "block dimensions must be non-zero".to_string(),
            });
        }
        let grid = GridSize { x: blocks_for(w, block.x)?, y: blocks_for(h, block.y)? };
        Ok(Launch { width: w, height: h, block, grid })
    }

    /// Number of pixels in the launched field.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixel rectangle `(x0, y0, x1, y1)` (exclusive end) owned by block
    /// `(bx, by)`, clipped to the image.
    pub fn block_bounds(&self, bx: u32, by: u32) -> (u32, u32, u32, u32) {
        let x0 = bx * self.block.x;
        let y0 = by * self.block.y;
        let x1 = (x0 + self.block.x).min(self.width);
        let y1 = (y0 + self.block.y).min(self.height);
        (x0, y0, x1, y1)
    }
}

impl fmt::Display for Launch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}×{} px, block {}, grid {}",
            self.width, self.height, self.block, self.grid
        )
    }
}
