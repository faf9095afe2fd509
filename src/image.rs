// image.rs - Row-major 2D sample field, generic over sample type.
//
// Every buffer the pipeline touches has this shape: the input image, the
// difference and direction fields written by the gradient stage, the raw
// integral result, and the normalised response. Rows are packed with no
// padding (index = y * width + x), which is exactly the layout the compute
// kernels address, so uploads and downloads are plain slice copies.
//
// Resampling (`resize_bilinear`) lives here because the scale driver needs
// it in both directions: shrink before the stencil, grow the response back.

use std::fmt;

use crate::error::{Result, SfegoError};

// ---------------------------------------------------------------------------
// Sample trait
// ---------------------------------------------------------------------------

/// Types that can be stored in an [`Image`].
pub trait Sample: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Raw value as `f32` (no normalisation: 200u8 → 200.0).
    fn to_f32(self) -> f32;

    /// Construct from `f32`, clamping and rounding for integer types.
    fn from_f32(v: f32) -> Self;
}

impl Sample for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Sample for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D field with runtime dimensions, stored row-major without padding.
#[derive(Clone, PartialEq)]
pub struct Image<T: Sample> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Sample> Image<T> {
    /// Zero-initialised field.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, T::default())
    }

    /// Field with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image { data: vec![value; width * height], width, height }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image { data, width, height }
    }

    /// Fallible variant of [`Image::from_vec`], used where the buffer comes
    /// back from a compute kernel.
    pub fn try_from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(SfegoError::ShapeMismatch {
                what: "image buffer",
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Image { data, width, height })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Number of samples (`width * height`).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample at column `x`, row `y`.
    ///
    /// # Panics
    /// Panics if `(x, y)` is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = value;
    }

    /// Borrow row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    /// Iterate `(x, y, value)` in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let w = self.width;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i % w, i / w, v))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Convert every sample to another type through `f32`.
    pub fn convert<U: Sample>(&self) -> Image<U> {
        Image {
            data: self.data.iter().map(|&v| U::from_f32(v.to_f32())).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Smallest and largest sample, or `None` for an empty field.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut it = self.data.iter().map(|v| v.to_f32());
        let first = it.next()?;
        Some(it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "sample ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl<T: Sample + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image {}×{}", self.width, self.height)?;
        if self.width <= 16 && self.height <= 16 {
            for y in 0..self.height {
                writeln!(f, "  {:?}", self.row(y))?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bilinear sampling and resizing
// ---------------------------------------------------------------------------

/// Sample `img` at a sub-pixel position with bilinear interpolation.
///
/// Coordinates outside the image are clamped to the border, so the result
/// is always a weighted mix of in-bounds samples.
pub fn interpolate_bilinear<T: Sample>(img: &Image<T>, x: f32, y: f32) -> f32 {
    let max_x = (img.width() - 1) as f32;
    let max_y = (img.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = img.get(x0, y0).to_f32() * (1.0 - fx) + img.get(x1, y0).to_f32() * fx;
    let bottom = img.get(x0, y1).to_f32() * (1.0 - fx) + img.get(x1, y1).to_f32() * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resize to `dst_w × dst_h` with bilinear interpolation.
///
/// Pixel centers are aligned (`src = (dst + 0.5) * scale - 0.5`), the
/// convention used by common image libraries for linear resizing, so a
/// constant image stays constant and a same-size resize is the identity.
///
/// # Errors
/// [`SfegoError::EmptyImage`] if the source or the target has a zero axis.
pub fn resize_bilinear<T: Sample>(src: &Image<T>, dst_w: usize, dst_h: usize) -> Result<Image<f32>> {
    if src.is_empty() {
        return Err(SfegoError::EmptyImage { width: src.width(), height: src.height() });
    }
    if dst_w == 0 || dst_h == 0 {
        return Err(SfegoError::EmptyImage { width: dst_w, height: dst_h });
    }

    let sx = src.width() as f32 / dst_w as f32;
    let sy = src.height() as f32 / dst_h as f32;
    let mut data = Vec::with_capacity(dst_w * dst_h);
    for y in 0..dst_h {
        let fy = (y as f32 + 0.5) * sy - 0.5;
        for x in 0..dst_w {
            let fx = (x as f32 + 0.5) * sx - 0.5;
            data.push(interpolate_bilinear(src, fx, fy));
        }
    }
    Ok(Image::from_vec(dst_w, dst_h, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_layout() {
        let img = Image::from_vec(3, 2, vec![10u8, 20, 30, 40, 50, 60]);
        assert_eq!(img.get(0, 0), 10);
        assert_eq!(img.get(2, 0), 30);
        assert_eq!(img.get(0, 1), 40);
        assert_eq!(img.row(1), &[40, 50, 60]);
    }

    #[test]
    fn test_try_from_vec_wrong_len() {
        let err = Image::<f32>::try_from_vec(4, 4, vec![0.0; 15]).unwrap_err();
        assert!(matches!(err, SfegoError::ShapeMismatch { expected: 16, actual: 15, .. }));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds() {
        Image::<u8>::new(4, 4).get(4, 0);
    }

    #[test]
    fn test_pixels_iterator_order() {
        let img = Image::from_vec(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]);
        let px: Vec<_> = img.pixels().collect();
        assert_eq!(px, vec![(0, 0, 1.0), (1, 0, 2.0), (0, 1, 3.0), (1, 1, 4.0)]);
    }

    #[test]
    fn test_convert_clamps() {
        let img = Image::from_vec(3, 1, vec![-5.0f32, 127.6, 300.0]);
        let out: Image<u8> = img.convert();
        assert_eq!(out.as_slice(), &[0, 128, 255]);
    }

    #[test]
    fn test_min_max() {
        let img = Image::from_vec(2, 2, vec![3.0f32, -1.0, 7.5, 0.0]);
        assert_eq!(img.min_max(), Some((-1.0, 7.5)));
        assert_eq!(Image::<f32>::new(0, 0).min_max(), None);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let img = Image::from_vec(2, 1, vec![0.0f32, 10.0]);
        assert!((interpolate_bilinear(&img, 0.5, 0.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_clamps_outside() {
        let img = Image::from_vec(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]);
        assert_eq!(interpolate_bilinear(&img, -3.0, -3.0), 1.0);
        assert_eq!(interpolate_bilinear(&img, 9.0, 9.0), 4.0);
    }

    #[test]
    fn test_resize_identity() {
        let img = Image::from_vec(3, 2, vec![1u8, 2, 3, 4, 5, 6]);
        let out = resize_bilinear(&img, 3, 2).unwrap();
        assert_eq!(out.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_resize_constant_stays_constant() {
        let img = Image::filled(37, 23, 42.0f32);
        let out = resize_bilinear(&img, 12, 9).unwrap();
        assert_eq!(out.dimensions(), (12, 9));
        assert!(out.as_slice().iter().all(|&v| (v - 42.0).abs() < 1e-4));
    }

    #[test]
    fn test_resize_to_zero_rejected() {
        let img = Image::filled(4, 4, 1.0f32);
        assert!(matches!(
            resize_bilinear(&img, 0, 4),
            Err(SfegoError::EmptyImage { width: 0, height: 4 })
        ));
    }
}
