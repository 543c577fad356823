use ndarray::Array4;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{config::GradientOptions, filters, volume::Volume};

/// Per-voxel gradient vectors, stored as `gx, gy, gz` for each voxel in the
/// voxel order of the volume.
///
/// Components are in normalized intensity per unit of spacing and are not
/// rescaled; turning them into normals is up to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientField {
    data: Array4<f32>,
}

impl GradientField {
    /// Get the dimensions of the field (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        let (depth, height, width, _) = self.data.dim();
        (depth, height, width)
    }

    /// Underlying array indexed as (z, y, x, component)
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Interleaved components, three per voxel.
    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("gradient fields are always in standard layout")
    }

    pub fn at(&self, x: usize, y: usize, z: usize) -> Option<[f32; 3]> {
        Some([
            *self.data.get([z, y, x, 0])?,
            *self.data.get([z, y, x, 1])?,
            *self.data.get([z, y, x, 2])?,
        ])
    }

    /// Smallest and largest gradient length.
    pub fn magnitude_range(&self) -> (f32, f32) {
        self.as_slice()
            .par_chunks_exact(3)
            .map(|g| (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt())
            .fold(|| (f32::MAX, 0.0f32), |(lo, hi), m| (lo.min(m), hi.max(m)))
            .reduce(|| (f32::MAX, 0.0), |a, b| (a.0.min(b.0), a.1.max(b.1)))
    }
}

pub struct GradientEstimator {
    options: GradientOptions,
    use_spacing: bool,
}

impl GradientEstimator {
    pub fn new(options: GradientOptions, use_spacing: bool) -> Self {
        Self {
            options,
            use_spacing,
        }
    }

    /// Smooth a copy of `volume` with a recursive Gaussian and differentiate
    /// it with central differences.
    #[instrument(skip_all, fields(dim = ?volume.dim()))]
    pub fn estimate(&self, volume: &Volume) -> GradientField {
        let spacing = self.use_spacing.then(|| volume.spacing());

        let mut smoothed = volume.data().clone();
        filters::recursive_gaussian(&mut smoothed, self.options.sigma, spacing);

        let field = GradientField {
            data: filters::central_gradient(smoothed.view(), spacing),
        };
        debug!(magnitude = ?field.magnitude_range(), "Gradient computed");
        field
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::volume::VoxelField;
    use ndarray::Array3;

    fn ramp(spacing: (f32, f32, f32)) -> Volume {
        let data = Array3::from_shape_fn((8, 8, 48), |(_, _, x)| x as f32);
        Normalizer::normalize(VoxelField::new(data, spacing)).0
    }

    #[test]
    fn interleaves_three_components_per_voxel() {
        let estimator = GradientEstimator::new(GradientOptions::default(), true);
        let field = estimator.estimate(&ramp((1.0, 1.0, 1.0)));
        assert_eq!(field.dim(), (8, 8, 48));
        assert_eq!(field.as_slice().len(), 8 * 8 * 48 * 3);
        assert_eq!(field.as_slice()[3..6], field.at(1, 0, 0).unwrap());
        assert!(field.at(48, 0, 0).is_none());
    }

    #[test]
    fn ramp_gradient_points_along_x() {
        let estimator = GradientEstimator::new(GradientOptions::default(), true);
        let field = estimator.estimate(&ramp((1.0, 1.0, 1.0)));
        let [gx, gy, gz] = field.at(24, 4, 4).unwrap();
        // Unit step per voxel after normalization over 47 steps.
        assert!((gx - 1.0 / 47.0).abs() < 1e-3, "gx = {gx}");
        assert!(gy.abs() < 1e-5);
        assert!(gz.abs() < 1e-5);
    }

    #[test]
    fn spacing_scales_the_gradient() {
        let estimator = GradientEstimator::new(GradientOptions::default(), true);
        let unit = estimator.estimate(&ramp((1.0, 1.0, 1.0)));
        let coarse = estimator.estimate(&ramp((2.0, 2.0, 2.0)));
        let [gx_unit, ..] = unit.at(24, 4, 4).unwrap();
        let [gx_coarse, ..] = coarse.at(24, 4, 4).unwrap();
        assert!((gx_coarse - gx_unit / 2.0).abs() < 1e-3);

        let ignored = GradientEstimator::new(GradientOptions::default(), false)
            .estimate(&ramp((2.0, 2.0, 2.0)));
        assert_eq!(ignored, unit);
    }

    #[test]
    fn estimation_is_reproducible() {
        let volume = ramp((1.0, 0.5, 2.0));
        let estimator = GradientEstimator::new(GradientOptions::default(), true);
        assert_eq!(estimator.estimate(&volume), estimator.estimate(&volume));
    }
}
