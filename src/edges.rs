//! Canny-style edge mask for normalized volumes.
//!
//! Pipeline, all on the floating-point field:
//!
//! 1. Discrete Gaussian smoothing with the configured variance.
//! 2. Central-difference gradient and its magnitude.
//! 3. Non-maximum suppression along the gradient direction, quantized to the
//!    nearest of the 26 neighbours.
//! 4. Hysteresis: voxels above the upper threshold seed edges that grow
//!    through 26-connected voxels above the lower threshold.
//! 5. Rescale of the binary response to `[0, 255]`.
//! 6. Binary dilation with a ball of the configured radius.
//!
//! Every step either writes disjoint planes in parallel or runs sequentially,
//! so the mask is identical however the work is scheduled.

use ndarray::{Array3, Axis, Zip};
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::{
    config::EdgeOptions,
    enums::{Interpolation, Orientation},
    filters,
    volume::{Volume, slice_from_axis, slice_to_image},
};

use image::GrayImage;

/// Mask value of an edge voxel.
pub const EDGE: u8 = 255;

/// Binary edge classification, one byte per voxel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMask {
    data: Array3<u8>,
}

impl EdgeMask {
    /// Get the dimensions of the mask (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// Mask bytes in the voxel order of the volume.
    pub fn as_slice(&self) -> &[u8] {
        self.data
            .as_slice()
            .expect("edge masks are always in standard layout")
    }

    pub fn is_edge(&self, x: usize, y: usize, z: usize) -> bool {
        self.data.get([z, y, x]).is_some_and(|&v| v == EDGE)
    }

    pub fn edge_count(&self) -> usize {
        self.data.par_iter().filter(|&&v| v == EDGE).count()
    }

    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        spacing: (f32, f32, f32),
        interpolation: Interpolation,
    ) -> Option<GrayImage> {
        let slice = slice_from_axis(&self.data, index, orientation)?;
        let scaled = slice.mapv(|v| f32::from(v) / 255.0);
        slice_to_image(&scaled.view(), spacing, orientation, interpolation)
    }
}

pub struct EdgeDetector {
    options: EdgeOptions,
    use_spacing: bool,
}

impl EdgeDetector {
    pub fn new(options: EdgeOptions, use_spacing: bool) -> Self {
        Self {
            options,
            use_spacing,
        }
    }

    /// Compute the edge mask of `volume` without modifying it.
    #[instrument(skip_all, fields(dim = ?volume.dim()))]
    pub fn detect(&self, volume: &Volume) -> EdgeMask {
        let spacing = self.use_spacing.then(|| volume.spacing());

        let mut smoothed = volume.data().clone();
        filters::discrete_gaussian(&mut smoothed, self.options.variance, spacing);

        let magnitude = gradient_magnitude(&smoothed, spacing);
        drop(smoothed);

        let candidates = suppress_non_maxima(&magnitude, self.options.lower_threshold);
        let response = hysteresis(
            &candidates,
            self.options.lower_threshold,
            self.options.upper_threshold,
        );
        let rescaled = rescale_to_u8(&response);
        let data = dilate(&rescaled, self.options.dilation_radius);

        let mask = EdgeMask { data };
        debug!(edges = mask.edge_count(), "Edge mask computed");
        mask
    }
}

// Gradient magnitude of the smoothed field with the direction kept alongside.
struct Magnitude {
    norm: Array3<f32>,
    direction: Array3<[i8; 3]>,
}

fn gradient_magnitude(smoothed: &Array3<f32>, spacing: Option<(f32, f32, f32)>) -> Magnitude {
    let gradient = filters::central_gradient(smoothed.view(), spacing);
    let dim = smoothed.dim();
    let mut norm = Array3::<f32>::zeros(dim);
    let mut direction = Array3::<[i8; 3]>::from_elem(dim, [0; 3]);

    Zip::from(&mut norm)
        .and(&mut direction)
        .and(gradient.lanes(Axis(3)))
        .par_for_each(|n, d, g| {
            let length = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt();
            *n = length;
            if length > 0.0 {
                // Nearest neighbour offset along the unit gradient, (z, y, x).
                *d = [
                    (g[2] / length).round() as i8,
                    (g[1] / length).round() as i8,
                    (g[0] / length).round() as i8,
                ];
            }
        });

    Magnitude { norm, direction }
}

#[inline]
fn offset(index: usize, delta: i8, len: usize) -> usize {
    (index as isize + delta as isize).clamp(0, len as isize - 1) as usize
}

// Keep voxels that peak along their gradient direction. Ties keep the voxel
// on the positive side so a plateau two voxels wide still yields one edge.
fn suppress_non_maxima(magnitude: &Magnitude, lower: f32) -> Array3<f32> {
    let (depth, height, width) = magnitude.norm.dim();
    let norm = &magnitude.norm;
    let mut out = Array3::<f32>::zeros((depth, height, width));

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut plane)| {
            for y in 0..height {
                for x in 0..width {
                    let m = norm[[z, y, x]];
                    let [dz, dy, dx] = magnitude.direction[[z, y, x]];
                    if m < lower || (dz, dy, dx) == (0, 0, 0) {
                        continue;
                    }
                    let ahead = norm[[
                        offset(z, dz, depth),
                        offset(y, dy, height),
                        offset(x, dx, width),
                    ]];
                    let behind = norm[[
                        offset(z, -dz, depth),
                        offset(y, -dy, height),
                        offset(x, -dx, width),
                    ]];
                    if m > ahead && m >= behind {
                        plane[[y, x]] = m;
                    }
                }
            }
        });

    out
}

// Grow edges from strong voxels through 26-connected weak ones. Returns 1.0
// on edges and 0.0 elsewhere.
fn hysteresis(candidates: &Array3<f32>, lower: f32, upper: f32) -> Array3<f32> {
    let (depth, height, width) = candidates.dim();
    let mut out = Array3::<f32>::zeros((depth, height, width));
    let mut stack: Vec<[usize; 3]> = candidates
        .indexed_iter()
        .filter(|&(_, &m)| m > 0.0 && m >= upper)
        .map(|((z, y, x), _)| [z, y, x])
        .collect();

    for &[z, y, x] in &stack {
        out[[z, y, x]] = 1.0;
    }

    while let Some([z, y, x]) = stack.pop() {
        for nz in z.saturating_sub(1)..=(z + 1).min(depth - 1) {
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let m = candidates[[nz, ny, nx]];
                    if out[[nz, ny, nx]] == 0.0 && m > 0.0 && m >= lower {
                        out[[nz, ny, nx]] = 1.0;
                        stack.push([nz, ny, nx]);
                    }
                }
            }
        }
    }

    out
}

// Linear map of [min, max] onto [0, 255]; a constant response maps to 0.
fn rescale_to_u8(response: &Array3<f32>) -> Array3<u8> {
    let (min, max) = response
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max <= min {
        return Array3::zeros(response.dim());
    }
    let scale = 255.0 / (max - min);
    response.mapv(|v| ((v - min) * scale).round() as u8)
}

/// Offsets (z, y, x) inside a ball of `radius` voxels.
///
/// A voxel belongs to the ball when its distance from the center is at most
/// `radius + 0.5`, which gives the 19-neighbourhood for radius 1.
pub fn ball_offsets(radius: usize) -> Vec<[isize; 3]> {
    let r = radius as isize;
    let limit = (radius as f32 + 0.5).powi(2);
    let mut offsets = Vec::new();
    for dz in -r..=r {
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dz * dz + dy * dy + dx * dx) as f32) <= limit {
                    offsets.push([dz, dy, dx]);
                }
            }
        }
    }
    offsets
}

fn dilate(mask: &Array3<u8>, radius: usize) -> Array3<u8> {
    let (depth, height, width) = mask.dim();
    let offsets = ball_offsets(radius);
    let mut out = Array3::<u8>::zeros((depth, height, width));

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut plane)| {
            for y in 0..height {
                for x in 0..width {
                    let hit = offsets.iter().any(|&[dz, dy, dx]| {
                        let (nz, ny, nx) = (z as isize + dz, y as isize + dy, x as isize + dx);
                        nz >= 0
                            && ny >= 0
                            && nx >= 0
                            && mask
                                .get([nz as usize, ny as usize, nx as usize])
                                .is_some_and(|&v| v == EDGE)
                    });
                    if hit {
                        plane[[y, x]] = EDGE;
                    }
                }
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::volume::VoxelField;

    fn cube_volume() -> Volume {
        let data = Array3::from_shape_fn((16, 16, 16), |(z, y, x)| {
            let inside = |i: usize| (4..12).contains(&i);
            if inside(z) && inside(y) && inside(x) { 1.0 } else { 0.0 }
        });
        Normalizer::normalize(VoxelField::new(data, (1.0, 1.0, 1.0))).0
    }

    fn detector() -> EdgeDetector {
        EdgeDetector::new(EdgeOptions::default(), true)
    }

    #[test]
    fn ball_of_radius_one_is_nineteen_neighbourhood() {
        let offsets = ball_offsets(1);
        assert_eq!(offsets.len(), 19);
        assert!(!offsets.contains(&[1, 1, 1]));
        assert!(offsets.contains(&[0, 1, 1]));
        assert_eq!(ball_offsets(0), vec![[0, 0, 0]]);
    }

    #[test]
    fn cube_faces_are_marked_and_interior_is_not() {
        let mask = detector().detect(&cube_volume());
        assert_eq!(mask.dim(), (16, 16, 16));
        assert!(mask.as_slice().iter().all(|&v| v == 0 || v == EDGE));
        assert!(mask.is_edge(3, 7, 7));
        assert!(mask.is_edge(4, 7, 7));
        assert!(mask.is_edge(7, 11, 8));
        assert!(!mask.is_edge(7, 7, 7));
        assert!(!mask.is_edge(0, 0, 0));
        assert!(!mask.is_edge(15, 15, 15));
    }

    #[test]
    fn constant_volume_has_no_edges() {
        let data = Array3::from_elem((6, 6, 6), 0.5f32);
        let volume = Normalizer::normalize(VoxelField::new(data, (1.0, 1.0, 1.0))).0;
        let mask = detector().detect(&volume);
        assert_eq!(mask.edge_count(), 0);
    }

    #[test]
    fn detection_is_reproducible() {
        let volume = cube_volume();
        assert_eq!(detector().detect(&volume), detector().detect(&volume));
    }

    #[test]
    fn dilation_grows_single_voxel() {
        let mut mask = Array3::<u8>::zeros((5, 5, 5));
        mask[[2, 2, 2]] = EDGE;
        let dilated = dilate(&mask, 1);
        assert_eq!(dilated.iter().filter(|&&v| v == EDGE).count(), 19);
        assert_eq!(dilated[[2, 2, 3]], EDGE);
        assert_eq!(dilated[[3, 3, 3]], 0);
    }

    #[test]
    fn hysteresis_keeps_weak_voxels_connected_to_strong_ones() {
        let mut candidates = Array3::<f32>::zeros((1, 1, 6));
        candidates[[0, 0, 0]] = 0.2;
        candidates[[0, 0, 1]] = 0.07;
        candidates[[0, 0, 2]] = 0.06;
        candidates[[0, 0, 4]] = 0.07;
        let out = hysteresis(&candidates, 0.05, 0.1);
        assert_eq!(out.as_slice().unwrap(), &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }
}
