//! # NRRD-volume library
//!
//! This crate loads volumetric scalar fields stored as a detached text header
//! with a raw payload and prepares the data a volume renderer needs.
//!
//! A load parses the header, reads the payload in blocks, converts every
//! sample to `f32` and rescales the field to `[0, 1]`. An intensity histogram
//! is computed right away. Two heavier products are then computed in the
//! background on the rayon pool:
//!  - Edge mask: Canny-style edges thickened by a binary dilation
//!  - Gradient field: per-voxel gradient of the Gaussian smoothed field
//!
//! The header is expected to have the following form:
//!
//! ```text
//! encoding: raw
//! content: <name>
//! type: unsigned char | unsigned short
//! dimension: 3
//! sizes: <w> <h> <d>
//! spacings: <sx> <sy> <sz>
//! data file: <relative-path>
//! ```
//!
//! Only raw encodings of 8-bit and 16-bit unsigned samples in three
//! dimensions are supported.
//!
//! # Examples
//!
//! ## Loading a volume and waiting for preprocessing
//!
//! ```no_run
//! # use nrrd_volume::pipeline::VolumePipeline;
//! # use nrrd_volume::enums::{Interpolation, Orientation};
//! let pipeline = VolumePipeline::default();
//! let preprocessing = pipeline
//!     .load("volumes/engine.nhdr")
//!     .expect("should have loaded the volume");
//!
//! // The normalized volume and histogram are usable immediately.
//! let histogram = preprocessing.dataset().histogram().clone();
//!
//! let dataset = preprocessing
//!     .wait_blocking()
//!     .expect("edge detection and gradient estimation should succeed");
//! let image = dataset
//!     .volume()
//!     .get_image_from_axis(dataset.volume().dim().0 / 2, Orientation::Axial, Interpolation::None)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png");
//! ```

pub mod config;
pub mod edges;
pub mod enums;
pub mod filters;
pub mod gradient;
pub mod header;
pub mod histogram;
mod interpolator;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod volume;
pub mod volume_loader;

pub use config::PipelineConfig;
pub use pipeline::{Dataset, PipelineError, PipelineEvent, VolumePipeline};
pub use volume_loader::VolumeLoader;
