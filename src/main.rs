//! sfego CLI - multi-scale SFEGO response maps for one image.
//!
//! For every `(resize_ratio, execute_radius)` record the image is shrunk,
//! run through the stencil, grown back to full size, stretched to 0..=255
//! and written next to the source as
//! `{image}_GMEMD_SpatialFrame{effective}({ratio}x{radius}).png`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use sfego::{
    artifact_name, parse_scale_records, run_scale, to_display_u8, BlockSize, BoundaryPolicy, CpuKernel,
    Image, ScaleRecord, SfegoConfig, SfegoError, SfegoPipeline, StencilKernel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Host reference kernel (rayon).
    Cpu,
    /// wgpu compute kernel (requires the `gpu` feature).
    Gpu,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "gpu")]
        {
            Backend::Gpu
        }
        #[cfg(not(feature = "gpu"))]
        {
            Backend::Cpu
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sfego")]
#[command(about = "Compute multi-scale SFEGO spatial-frame response maps")]
#[command(version)]
struct Cli {
    /// Input image (any format the `image` crate reads; converted to grayscale).
    image: PathBuf,

    /// Scale file: one `<resize_ratio> <execute_radius>` pair per line.
    #[arg(long, default_value = "default_radius", conflicts_with = "ratio")]
    scales: PathBuf,

    /// Run a single pass at this resize ratio instead of reading a scale file.
    #[arg(long, requires = "radius")]
    ratio: Option<f64>,

    /// Neighbor radius for the single pass given by --ratio.
    #[arg(long, requires = "ratio")]
    radius: Option<u32>,

    /// Compute backend.
    #[arg(long, value_enum, default_value_t = Backend::default())]
    backend: Backend,

    /// Out-of-bounds neighbor policy: clamp, wrap or skip.
    #[arg(long, default_value_t = BoundaryPolicy::Clamp)]
    boundary: BoundaryPolicy,

    /// Workers per block as WxH.
    #[arg(long, default_value = "16x16", value_parser = parse_block)]
    block: BlockSize,

    /// Allocate fresh buffers for every pass.
    #[arg(long)]
    no_pool: bool,

    /// Write artifacts here instead of next to the input image.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Prefer the GPU adapter whose name contains this string.
    #[arg(long)]
    adapter: Option<String>,

    /// Accept a software (CPU) GPU adapter.
    #[arg(long)]
    allow_software_adapter: bool,
}

fn parse_block(s: &str) -> Result<BlockSize, String> {
    let (x, y) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let x: u32 = x.trim().parse().map_err(|e| format!("block width '{x}': {e}"))?;
    let y: u32 = y.trim().parse().map_err(|e| format!("block height '{y}': {e}"))?;
    BlockSize::new(x, y).map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let gray = load_grayscale(&cli.image)?;
    info!(path = %cli.image.display(), width = gray.width(), height = gray.height(), "loaded image");

    let records = load_records(&cli)?;
    if records.is_empty() {
        bail!("no valid scale records to run");
    }

    let config = SfegoConfig {
        block: cli.block,
        boundary: cli.boundary,
        pool_capacity: if cli.no_pool { 0 } else { SfegoConfig::default().pool_capacity },
    };

    match cli.backend {
        Backend::Cpu => {
            let pipeline = SfegoPipeline::new(CpuKernel, config)?;
            run_records(&pipeline, &gray, &records, &cli)
        }
        #[cfg(feature = "gpu")]
        Backend::Gpu => {
            use sfego::gpu::{GpuConfig, GpuDevice, GpuKernel};

            let gpu_config = GpuConfig {
                adapter_name_hint: cli.adapter.clone(),
                allow_software_adapter: cli.allow_software_adapter,
                ..GpuConfig::default()
            };
            let device = GpuDevice::with_config(&gpu_config).context("GPU initialisation failed")?;
            let kernel = GpuKernel::new(device, config.block).context("GPU kernel initialisation failed")?;
            let pipeline = SfegoPipeline::new(kernel, config)?;
            run_records(&pipeline, &gray, &records, &cli)
        }
        #[cfg(not(feature = "gpu"))]
        Backend::Gpu => bail!("sfego was built without the `gpu` feature; use --backend cpu"),
    }
}

/// Load any supported image and convert to 8-bit grayscale.
fn load_grayscale(path: &Path) -> anyhow::Result<Image<u8>> {
    let luma = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_luma8();
    let (w, h) = luma.dimensions();
    Ok(Image::from_vec(w as usize, h as usize, luma.into_raw()))
}

/// Records from --ratio/--radius, or from the scale file. Malformed lines are
/// logged and dropped.
fn load_records(cli: &Cli) -> anyhow::Result<Vec<ScaleRecord>> {
    if let (Some(ratio), Some(radius)) = (cli.ratio, cli.radius) {
        return Ok(vec![ScaleRecord::new(ratio, radius)?]);
    }

    let text = std::fs::read_to_string(&cli.scales)
        .with_context(|| format!("failed to read scale file {}", cli.scales.display()))?;
    let records = parse_scale_records(&text)
        .into_iter()
        .filter_map(|r| match r {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(file = %cli.scales.display(), "skipping record: {e}");
                None
            }
        })
        .collect();
    Ok(records)
}

fn run_records<K: StencilKernel>(
    pipeline: &SfegoPipeline<K>,
    gray: &Image<u8>,
    records: &[ScaleRecord],
    cli: &Cli,
) -> anyhow::Result<()> {
    for record in records {
        let response = match run_scale(pipeline, gray, record) {
            Ok(r) => r,
            // The ratio shrank the image to nothing: a bad record, not a
            // device failure.
            Err(e @ SfegoError::EmptyImage { .. }) => {
                warn!(%record, "skipping record: {e}");
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("scale pass {record} failed")),
        };

        let display = to_display_u8(&response);
        let out = output_path(&cli.image, cli.out_dir.as_deref(), record);
        save_gray(&display, &out)?;
        info!(path = %out.display(), "wrote artifact");
    }

    let stats = pipeline.pool_stats();
    info!(hits = stats.hits, misses = stats.misses, evictions = stats.evictions, "buffer pool");
    Ok(())
}

fn output_path(source: &Path, out_dir: Option<&Path>, record: &ScaleRecord) -> PathBuf {
    match out_dir {
        Some(dir) => {
            let name = source.file_name().map(Path::new).unwrap_or(source);
            dir.join(artifact_name(name, record))
        }
        None => PathBuf::from(artifact_name(source, record)),
    }
}

fn save_gray(img: &Image<u8>, path: &Path) -> anyhow::Result<()> {
    let (w, h) = img.dimensions();
    let buf = image::GrayImage::from_raw(w as u32, h as u32, img.as_slice().to_vec())
        .context("response buffer does not match its dimensions")?;
    buf.save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
