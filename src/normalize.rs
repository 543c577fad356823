//! Rescaling of a raw voxel field to the unit interval.
//!
//! The minimum and maximum are found with a parallel reduction, then every
//! voxel is mapped through `(v - min) / (max - min)` in place. A field where
//! all samples are equal has no range to divide by; it becomes a constant
//! field of zeros instead of NaN.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::volume::{Volume, VoxelField};

/// Value every voxel takes when the field has no range.
pub const DEGENERATE_FILL: f32 = 0.0;

/// Original data range of a normalized field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRange {
    pub min: f32,
    pub max: f32,
}

impl NormalizedRange {
    /// `true` when `min == max` and the field was filled with [`DEGENERATE_FILL`]
    pub fn is_degenerate(&self) -> bool {
        self.min == self.max
    }
}

pub struct Normalizer;

impl Normalizer {
    /// Minimum and maximum over all voxels, `None` for an empty field.
    pub fn min_max(values: &[f32]) -> Option<(f32, f32)> {
        values
            .par_iter()
            .fold(
                || None,
                |acc: Option<(f32, f32)>, &v| match acc {
                    None => Some((v, v)),
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                },
            )
            .reduce(
                || None,
                |a, b| match (a, b) {
                    (Some((lo_a, hi_a)), Some((lo_b, hi_b))) => {
                        Some((lo_a.min(lo_b), hi_a.max(hi_b)))
                    }
                    (a, None) => a,
                    (None, b) => b,
                },
            )
    }

    /// Rescale `field` to `[0, 1]`, consuming it.
    pub fn normalize(field: VoxelField) -> (Volume, NormalizedRange) {
        let (mut data, spacing) = field.into_parts();

        let (min, max) = match data.as_slice() {
            Some(values) => Self::min_max(values),
            None => Self::min_max(&data.iter().copied().collect::<Vec<_>>()),
        }
        .unwrap_or((0.0, 0.0));
        let range = NormalizedRange { min, max };

        if range.is_degenerate() {
            warn!(value = min, "Volume has a constant value, normalizing to a uniform field");
            data.par_mapv_inplace(|_| DEGENERATE_FILL);
        } else {
            let scale = max - min;
            data.par_mapv_inplace(|v| ((v - min) / scale).clamp(0.0, 1.0));
        }

        info!(min, max, "Data range normalized to [0, 1]");
        (Volume::new(data, spacing, (min, max)), range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn field(values: Vec<f32>) -> VoxelField {
        let len = values.len();
        VoxelField::new(
            Array3::from_shape_vec((1, 1, len), values).unwrap(),
            (1.0, 1.0, 1.0),
        )
    }

    #[test]
    fn maps_extremes_to_unit_interval() {
        let (volume, range) = Normalizer::normalize(field(vec![0.0, 85.0, 170.0, 255.0]));
        assert_eq!(range, NormalizedRange { min: 0.0, max: 255.0 });
        let values = volume.as_slice();
        assert_eq!(values[0], 0.0);
        assert!((values[1] - 1.0 / 3.0).abs() < 1e-6);
        assert!((values[2] - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(values[3], 1.0);
        assert_eq!(volume.raw_range(), (0.0, 255.0));
    }

    #[test]
    fn offset_ranges_are_shifted() {
        let (volume, _) = Normalizer::normalize(field(vec![300.0, 1000.0, 650.0, 300.0]));
        assert_eq!(volume.as_slice(), &[0.0, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn constant_field_becomes_uniform_without_nan() {
        let (volume, range) = Normalizer::normalize(field(vec![42.0; 27]));
        assert!(range.is_degenerate());
        assert!(volume.as_slice().iter().all(|&v| v == DEGENERATE_FILL));
    }

    #[test]
    fn min_max_of_large_input_matches_sequential_scan() {
        let values: Vec<f32> = (0..100_000).map(|i| ((i * 7919) % 65_536) as f32).collect();
        let expected = values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        assert_eq!(Normalizer::min_max(&values), Some(expected));
        assert_eq!(Normalizer::min_max(&[]), None);
    }
}
