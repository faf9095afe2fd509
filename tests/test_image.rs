// tests/test_image.rs - Integration tests for Image<T>, conversion and
// bilinear resampling.
//
// Run with `cargo test --test test_image`. Only the public API is reachable
// from here.

use sfego::image::{interpolate_bilinear, resize_bilinear, Image};
use sfego::{to_display_u8, SfegoError};

// ===== Construction & access =====

#[test]
fn image_new_zero_initialized() {
    let img: Image<u8> = Image::new(100, 50);
    assert_eq!(img.dimensions(), (100, 50));
    assert_eq!(img.get(0, 0), 0);
    assert_eq!(img.get(99, 49), 0);
}

#[test]
fn image_set_get_checkerboard() {
    let mut img: Image<u8> = Image::new(10, 10);
    for y in 0..10 {
        for x in 0..10 {
            img.set(x, y, if (x + y) % 2 == 0 { 255 } else { 0 });
        }
    }
    for (x, y, v) in img.pixels() {
        let expected = if (x + y) % 2 == 0 { 255u8 } else { 0u8 };
        assert_eq!(v, expected, "mismatch at ({x}, {y})");
    }
}

#[test]
fn from_vec_is_row_major() {
    let img = Image::from_vec(3, 2, vec![10u8, 20, 30, 40, 50, 60]);
    assert_eq!(img.get(2, 0), 30);
    assert_eq!(img.get(0, 1), 40);
    assert_eq!(img.row(1), &[40, 50, 60]);
}

#[test]
fn try_from_vec_reports_length() {
    assert!(matches!(
        Image::<u8>::try_from_vec(3, 3, vec![0; 8]),
        Err(SfegoError::ShapeMismatch { expected: 9, actual: 8, .. })
    ));
}

#[test]
fn clone_is_independent() {
    let mut img: Image<u8> = Image::new(4, 4);
    img.set(0, 0, 42);
    let copy = img.clone();
    img.set(0, 0, 99);
    assert_eq!(copy.get(0, 0), 42);
    assert_eq!(img.get(0, 0), 99);
}

#[test]
fn empty_dimension_image() {
    let img: Image<f32> = Image::new(0, 7);
    assert!(img.is_empty());
    assert_eq!(img.pixels().count(), 0);
}

// ===== Conversion =====

#[test]
fn u8_to_f32_keeps_raw_values() {
    let img = Image::from_vec(3, 1, vec![0u8, 128, 255]);
    let f: Image<f32> = img.convert();
    assert_eq!(f.as_slice(), &[0.0, 128.0, 255.0]);
}

// ===== Bilinear interpolation =====

#[test]
fn bilinear_exact_at_integer_coords() {
    let mut img: Image<f32> = Image::new(3, 3);
    for y in 0..3 {
        for x in 0..3 {
            img.set(x, y, x as f32 + y as f32 * 10.0);
        }
    }
    assert!((interpolate_bilinear(&img, 1.0, 0.0) - 1.0).abs() < 1e-6);
    assert!((interpolate_bilinear(&img, 0.0, 1.0) - 10.0).abs() < 1e-6);
    assert!((interpolate_bilinear(&img, 2.0, 2.0) - 22.0).abs() < 1e-6);
}

#[test]
fn bilinear_linear_gradient() {
    let mut img: Image<f32> = Image::new(10, 10);
    for y in 0..10 {
        for x in 0..10 {
            img.set(x, y, x as f32 * 3.0 + y as f32 * 7.0);
        }
    }
    for (px, py) in [(0.5, 0.5), (2.3, 4.7), (7.9, 1.1), (0.0, 8.0)] {
        let expected = px * 3.0 + py * 7.0;
        let actual = interpolate_bilinear(&img, px, py);
        assert!(
            (actual - expected).abs() < 1e-4,
            "bilinear({px}, {py}): expected {expected}, got {actual}"
        );
    }
}

// ===== Resizing =====

#[test]
fn resize_constant_stays_constant() {
    let img = Image::filled(13, 7, 50u8);
    let down = resize_bilinear(&img, 4, 3).unwrap();
    let up = resize_bilinear(&down, 40, 21).unwrap();
    assert!(down.as_slice().iter().all(|&v| (v - 50.0).abs() < 1e-4));
    assert!(up.as_slice().iter().all(|&v| (v - 50.0).abs() < 1e-4));
}

#[test]
fn resize_same_size_is_identity() {
    let img = Image::from_vec(3, 2, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let out = resize_bilinear(&img, 3, 2).unwrap();
    assert_eq!(out, img);
}

#[test]
fn resize_halving_averages_pairs() {
    let img = Image::from_vec(4, 1, vec![0.0f32, 10.0, 20.0, 30.0]);
    let out = resize_bilinear(&img, 2, 1).unwrap();
    assert!((out.get(0, 0) - 5.0).abs() < 1e-5);
    assert!((out.get(1, 0) - 25.0).abs() < 1e-5);
}

#[test]
fn resize_to_zero_rejected() {
    let img = Image::filled(4, 4, 1u8);
    assert!(matches!(resize_bilinear(&img, 0, 4), Err(SfegoError::EmptyImage { .. })));
}

// ===== Display scaling =====

#[test]
fn display_stretch_spans_full_range() {
    let field = Image::from_vec(2, 2, vec![-3.0f32, 1.0, 5.0, 0.0]);
    let out = to_display_u8(&field);
    assert_eq!(out.get(0, 0), 0);
    assert_eq!(out.get(0, 1), 255);
}
