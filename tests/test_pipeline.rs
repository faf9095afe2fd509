// tests/test_pipeline.rs - End-to-end behaviour of the SFEGO pipeline on the
// host reference kernel.
//
// Run with `cargo test --test test_pipeline`.

use sfego::{
    compute_sfego, BlockSize, BoundaryPolicy, CpuKernel, Image, Launch, SfegoConfig, SfegoError,
    SfegoPipeline,
};

// ===== Helpers =====

/// Deterministic LCG noise in 0..256.
fn noise(w: usize, h: usize, seed: u32) -> Image<f32> {
    let mut rng = seed;
    let data = (0..w * h)
        .map(|_| {
            rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
            (rng >> 24) as f32
        })
        .collect();
    Image::from_vec(w, h, data)
}

fn pipeline(config: SfegoConfig) -> SfegoPipeline<CpuKernel> {
    SfegoPipeline::new(CpuKernel, config).unwrap()
}

fn max_abs_diff(a: &Image<f32>, b: &Image<f32>) -> f32 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Tolerance relative to the largest response magnitude.
fn tolerance(a: &Image<f32>) -> f32 {
    1e-5 * a.as_slice().iter().fold(1.0f32, |m, v| m.max(v.abs()))
}

// ===== Launch geometry =====

#[test]
fn grid_covers_image_with_ceiling_division() {
    let block = BlockSize::default();
    let l = Launch::new(17, 16, block).unwrap();
    assert_eq!((l.grid.x, l.grid.y), (2, 1));
    let l = Launch::new(1, 33, block).unwrap();
    assert_eq!((l.grid.x, l.grid.y), (1, 3));
}

#[test]
fn zero_axis_is_an_error() {
    assert!(matches!(
        Launch::new(0, 16, BlockSize::default()),
        Err(SfegoError::EmptyImage { .. })
    ));
    assert!(matches!(
        Launch::new(16, 0, BlockSize::default()),
        Err(SfegoError::EmptyImage { .. })
    ));
}

// ===== Shape and error contract =====

#[test]
fn output_shape_matches_input() {
    for &(w, h) in &[(1, 1), (1, 9), (17, 3), (32, 32), (45, 20)] {
        for r in [1, 2, 4] {
            let out = compute_sfego(&noise(w, h, 5), r).unwrap();
            assert_eq!(out.dimensions(), (w, h), "size {w}×{h} r={r}");
        }
    }
}

#[test]
fn invalid_inputs_rejected() {
    assert!(matches!(
        compute_sfego(&Image::<u8>::new(0, 0), 3),
        Err(SfegoError::EmptyImage { .. })
    ));
    assert!(matches!(
        compute_sfego(&Image::<u8>::new(4, 4), 0),
        Err(SfegoError::InvalidRadius(0))
    ));
}

// ===== Response properties =====

#[test]
fn uniform_image_has_zero_response() {
    for boundary in [BoundaryPolicy::Clamp, BoundaryPolicy::Wrap, BoundaryPolicy::Skip] {
        let p = pipeline(SfegoConfig { boundary, ..SfegoConfig::default() });
        let out = p.compute(&Image::filled(19, 13, 77u8), 3).unwrap();
        assert!(out.as_slice().iter().all(|&v| v == 0.0), "{boundary}: non-zero response");
    }
}

#[test]
fn bright_spot_peaks_at_center() {
    let mut img = Image::<f32>::new(15, 15);
    img.set(7, 7, 100.0);
    let out = compute_sfego(&img, 1).unwrap();
    let center = out.get(7, 7);
    assert!(center > 0.0, "center response {center}");
    for (x, y, v) in out.pixels() {
        assert!(v <= center, "({x}, {y}) = {v} exceeds center {center}");
    }
}

#[test]
fn intensity_offset_does_not_change_response() {
    let img = noise(24, 18, 11);
    let mut shifted = img.clone();
    for v in shifted.as_mut_slice() {
        *v += 40.0;
    }
    let a = compute_sfego(&img, 2).unwrap();
    let b = compute_sfego(&shifted, 2).unwrap();
    assert!(max_abs_diff(&a, &b) <= tolerance(&a));
}

#[test]
fn negated_image_negates_response() {
    let img = noise(20, 20, 23);
    let mut neg = img.clone();
    for v in neg.as_mut_slice() {
        *v = -*v;
    }
    let a = compute_sfego(&img, 3).unwrap();
    let b = compute_sfego(&neg, 3).unwrap();
    let tol = 10.0 * tolerance(&a);
    for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
        assert!((x + y).abs() <= tol, "{x} vs {y}");
    }
}

#[test]
fn u8_and_f32_inputs_agree() {
    let f = noise(16, 12, 3);
    let u: Image<u8> = f.convert();
    assert_eq!(compute_sfego(&u, 2).unwrap(), compute_sfego(&f, 2).unwrap());
}

// ===== Execution-strategy invariance =====

#[test]
fn block_size_does_not_change_result() {
    let img = noise(37, 29, 41);
    let reference = pipeline(SfegoConfig::default()).compute(&img, 3).unwrap();
    for (bx, by) in [(1, 1), (8, 8), (32, 4), (64, 64)] {
        let p = pipeline(SfegoConfig { block: BlockSize::new(bx, by).unwrap(), ..SfegoConfig::default() });
        assert_eq!(p.compute(&img, 3).unwrap(), reference, "block {bx}×{by}");
    }
}

#[test]
fn pooled_and_unpooled_results_match() {
    let img = noise(30, 22, 8);
    let pooled = pipeline(SfegoConfig::default());
    let unpooled = pipeline(SfegoConfig { pool_capacity: 0, ..SfegoConfig::default() });

    // Interleave radii so the pool swaps resident neighbor lists.
    for r in [2, 3, 2, 3, 2] {
        assert_eq!(pooled.compute(&img, r).unwrap(), unpooled.compute(&img, r).unwrap(), "r={r}");
    }
    let stats = pooled.pool_stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 3);
    assert_eq!(unpooled.pool_stats().hits, 0);
}

#[test]
fn pool_reuse_across_different_images() {
    let p = pipeline(SfegoConfig::default());
    let a = noise(16, 16, 1);
    let b = noise(16, 16, 2);
    let first_b = compute_sfego(&b, 2).unwrap();
    p.compute(&a, 2).unwrap();
    assert_eq!(p.compute(&b, 2).unwrap(), first_b);
}

#[test]
fn wrap_policy_is_translation_equivariant() {
    // On a torus, shifting the input shifts the output.
    let (w, h) = (12usize, 10usize);
    let img = noise(w, h, 17);
    let mut shifted = Image::<f32>::new(w, h);
    for (x, y, v) in img.pixels() {
        shifted.set((x + 3) % w, (y + 2) % h, v);
    }
    let p = pipeline(SfegoConfig { boundary: BoundaryPolicy::Wrap, ..SfegoConfig::default() });
    let a = p.compute(&img, 2).unwrap();
    let b = p.compute(&shifted, 2).unwrap();
    for (x, y, v) in a.pixels() {
        let s = b.get((x + 3) % w, (y + 2) % h);
        assert!((v - s).abs() <= tolerance(&a), "({x}, {y}): {v} vs {s}");
    }
}
