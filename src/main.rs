use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use tracing::info;

use nrrd_volume::{
    PipelineEvent, VolumePipeline,
    config::{PipelineConfig, load_config},
    enums::{Interpolation, Orientation},
    logging::init_logging,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Axis {
    Axial,
    Coronal,
    Sagittal,
}

impl From<Axis> for Orientation {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::Axial => Orientation::Axial,
            Axis::Coronal => Orientation::Coronal,
            Axis::Sagittal => Orientation::Sagittal,
        }
    }
}

/// Load a raw NRRD volume and compute its histogram, edge mask and gradient.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Detached header (.nhdr) of the volume
    header: PathBuf,

    /// JSON file with pipeline parameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to write center slice previews and the histogram to
    #[arg(long)]
    export: Option<PathBuf>,

    /// Slice orientation of the previews
    #[arg(long, value_enum, default_value_t = Axis::Axial)]
    orientation: Axis,

    /// Resample previews to isotropic aspect ratio
    #[arg(long)]
    isotropic: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let pipeline = VolumePipeline::new(config);
    let mut events = pipeline.subscribe();
    let preprocessing = pipeline
        .load(&args.header)
        .with_context(|| format!("failed to load {}", args.header.display()))?;

    while let Some(event) = events.next().await {
        info!(?event, "Pipeline event");
        if matches!(
            event,
            PipelineEvent::PreprocessCompleted(_) | PipelineEvent::Failed { .. }
        ) {
            break;
        }
    }

    let dataset = preprocessing.wait().await?;
    let (width, height, depth) = dataset.volume().size();
    info!(
        name = dataset.name(),
        size = ?(width, height, depth),
        raw_range = ?dataset.volume().raw_range(),
        edge_voxels = dataset.edges().map(|e| e.edge_count()),
        gradient_range = ?dataset.gradient().map(|g| g.magnitude_range()),
        "Volume ready"
    );

    if let Some(dir) = &args.export {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let orientation = Orientation::from(args.orientation);
        let interpolation = if args.isotropic {
            Interpolation::Bilinear
        } else {
            Interpolation::None
        };
        let (depth_dim, height_dim, width_dim) = dataset.volume().dim();
        let center = match orientation {
            Orientation::Axial => depth_dim / 2,
            Orientation::Coronal => height_dim / 2,
            Orientation::Sagittal => width_dim / 2,
        };

        if let Some(image) =
            dataset
                .volume()
                .get_image_from_axis(center, orientation, interpolation)
        {
            image.save(dir.join("volume.png"))?;
        }
        if let Some(image) = dataset.edges().and_then(|edges| {
            edges.get_image_from_axis(
                center,
                orientation,
                dataset.volume().spacing(),
                interpolation,
            )
        }) {
            image.save(dir.join("edges.png"))?;
        }
        fs::write(
            dir.join("histogram.json"),
            serde_json::to_string_pretty(dataset.histogram())?,
        )?;
        info!(dir = %dir.display(), "Exported previews");
    }

    Ok(())
}
