//! Separable smoothing and differentiation on 3D scalar fields.
//!
//! Arrays are indexed (z, y, x) and spacing is given as (x, y, z). Every
//! filter reads a lane along one axis into a scratch buffer, filters it and
//! writes it back, with lanes processed in parallel. Lanes never overlap so
//! the result does not depend on scheduling.
//!
//! Borders replicate the edge voxel (zero-flux Neumann).

use ndarray::{Array3, Array4, ArrayView3, Axis, Zip, s};
use rayon::prelude::*;

/// The three volume axes, x fastest.
pub const AXES: [Axis; 3] = [Axis(2), Axis(1), Axis(0)];

/// Spacing along a storage axis.
#[inline]
pub fn axis_spacing(spacing: (f32, f32, f32), axis: Axis) -> f32 {
    match axis.index() {
        2 => spacing.0,
        1 => spacing.1,
        _ => spacing.2,
    }
}

/// Normalized sampled Gaussian with a radius of three standard deviations.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as i32;
    let denom = 2.0 * sigma * sigma;
    let mut taps: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= sum);
    taps
}

/// Convolve every lane along `axis` with a symmetric kernel.
pub fn convolve_axis(data: &mut Array3<f32>, axis: Axis, taps: &[f32]) {
    if taps.len() <= 1 {
        return;
    }
    let radius = (taps.len() / 2) as isize;
    Zip::from(data.lanes_mut(axis)).par_for_each(|mut lane| {
        let src: Vec<f32> = lane.iter().copied().collect();
        let last = src.len() as isize - 1;
        for (i, out) in lane.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (k, &tap) in taps.iter().enumerate() {
                let j = (i as isize + k as isize - radius).clamp(0, last);
                acc += tap * src[j as usize];
            }
            *out = acc;
        }
    });
}

/// Discrete Gaussian smoothing of the given variance on all three axes.
///
/// With `spacing`, the variance is in physical units and the kernel on each
/// axis is narrowed by that axis' spacing.
pub fn discrete_gaussian(
    data: &mut Array3<f32>,
    variance: f32,
    spacing: Option<(f32, f32, f32)>,
) {
    let sigma = variance.max(0.0).sqrt();
    for axis in AXES {
        let step = spacing.map_or(1.0, |s| axis_spacing(s, axis));
        convolve_axis(data, axis, &gaussian_kernel(sigma / step));
    }
}

/// Coefficients of the third order recursive Gaussian of Young and van Vliet.
#[derive(Debug, Clone, Copy)]
struct RecursiveCoefficients {
    b: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl RecursiveCoefficients {
    fn new(sigma: f32) -> Self {
        // The approximation is only fitted for sigma >= 0.5.
        let sigma = f64::from(sigma.max(0.5));
        let q = if sigma >= 2.5 {
            0.98711 * sigma - 0.96330
        } else {
            3.97156 - 4.14554 * (1.0 - 0.26891 * sigma).sqrt()
        };
        let q2 = q * q;
        let q3 = q2 * q;
        let b0 = 1.57825 + 2.44413 * q + 1.4281 * q2 + 0.422205 * q3;
        let b1 = 2.44413 * q + 2.85619 * q2 + 1.26661 * q3;
        let b2 = -(1.4281 * q2 + 1.26661 * q3);
        let b3 = 0.422205 * q3;

        Self {
            b: (1.0 - (b1 + b2 + b3) / b0) as f32,
            a1: (b1 / b0) as f32,
            a2: (b2 / b0) as f32,
            a3: (b3 / b0) as f32,
        }
    }

    // Causal pass followed by the anti-causal pass, edges replicated.
    fn apply(&self, line: &mut [f32]) {
        let n = line.len();
        if n == 0 {
            return;
        }
        let Self { b, a1, a2, a3 } = *self;

        let first = line[0];
        let (mut w1, mut w2, mut w3) = (first, first, first);
        for v in line.iter_mut() {
            let w = b * *v + a1 * w1 + a2 * w2 + a3 * w3;
            *v = w;
            w3 = w2;
            w2 = w1;
            w1 = w;
        }

        let last = line[n - 1];
        let (mut y1, mut y2, mut y3) = (last, last, last);
        for v in line.iter_mut().rev() {
            let y = b * *v + a1 * y1 + a2 * y2 + a3 * y3;
            *v = y;
            y3 = y2;
            y2 = y1;
            y1 = y;
        }
    }
}

/// Recursive Gaussian smoothing with standard deviation `sigma` on all axes.
///
/// Cost per voxel does not depend on `sigma`. With `spacing`, `sigma` is in
/// physical units.
pub fn recursive_gaussian(
    data: &mut Array3<f32>,
    sigma: f32,
    spacing: Option<(f32, f32, f32)>,
) {
    for axis in AXES {
        let step = spacing.map_or(1.0, |s| axis_spacing(s, axis));
        let coefficients = RecursiveCoefficients::new(sigma / step);
        Zip::from(data.lanes_mut(axis)).par_for_each(|mut lane| {
            let mut line: Vec<f32> = lane.iter().copied().collect();
            coefficients.apply(&mut line);
            lane.iter_mut().zip(line).for_each(|(out, v)| *out = v);
        });
    }
}

/// Central difference gradient, interleaved as (z, y, x, [gx, gy, gz]).
///
/// Derivatives are divided by the spacing when given, so the result is in
/// intensity per physical unit. Border voxels use the replicated neighbour.
pub fn central_gradient(
    data: ArrayView3<'_, f32>,
    spacing: Option<(f32, f32, f32)>,
) -> Array4<f32> {
    let (depth, height, width) = data.dim();
    let (sx, sy, sz) = spacing.unwrap_or((1.0, 1.0, 1.0));
    let scale = [0.5 / sx, 0.5 / sy, 0.5 / sz];

    let mut out = Array4::<f32>::zeros((depth, height, width, 3));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut plane)| {
            let z0 = z.saturating_sub(1);
            let z1 = (z + 1).min(depth - 1);
            for y in 0..height {
                let y0 = y.saturating_sub(1);
                let y1 = (y + 1).min(height - 1);
                for x in 0..width {
                    let x0 = x.saturating_sub(1);
                    let x1 = (x + 1).min(width - 1);
                    let mut g = plane.slice_mut(s![y, x, ..]);
                    g[0] = (data[[z, y, x1]] - data[[z, y, x0]]) * scale[0];
                    g[1] = (data[[z, y1, x]] - data[[z, y0, x]]) * scale[1];
                    g[2] = (data[[z1, y, x]] - data[[z0, y, x]]) * scale[2];
                }
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(n: usize) -> Array3<f32> {
        let mut data = Array3::zeros((n, n, n));
        data[[n / 2, n / 2, n / 2]] = 1.0;
        data
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let taps = gaussian_kernel(1.0);
        assert_eq!(taps.len(), 7);
        assert!((taps.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(taps[0], taps[6]);
        assert!(taps[3] > taps[2]);
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
    }

    #[test]
    fn smoothing_preserves_constant_fields() {
        let mut data = Array3::from_elem((5, 6, 7), 0.75f32);
        discrete_gaussian(&mut data, 1.0, None);
        assert!(data.iter().all(|&v| (v - 0.75).abs() < 1e-5));

        let mut data = Array3::from_elem((5, 6, 7), 0.75f32);
        recursive_gaussian(&mut data, 2.0, Some((1.0, 1.0, 2.0)));
        assert!(data.iter().all(|&v| (v - 0.75).abs() < 1e-4));
    }

    #[test]
    fn smoothing_spreads_an_impulse_symmetrically() {
        let mut data = impulse(15);
        recursive_gaussian(&mut data, 2.0, None);
        let c = 7;
        assert!(data[[c, c, c]] > data[[c, c, c + 1]]);
        assert!((data[[c, c, c + 2]] - data[[c, c, c - 2]]).abs() < 1e-3);
        assert!((data[[c + 2, c, c]] - data[[c, c + 2, c]]).abs() < 1e-6);

        let mut data = impulse(15);
        discrete_gaussian(&mut data, 1.0, None);
        assert!((data.sum() - 1.0).abs() < 1e-4);
        assert_eq!(data[[c, c, c + 1]], data[[c, c, c - 1]]);
    }

    #[test]
    fn central_gradient_of_linear_ramp() {
        let data = Array3::from_shape_fn((4, 5, 6), |(z, y, x)| {
            2.0 * x as f32 + 3.0 * y as f32 - z as f32
        });
        let gradient = central_gradient(data.view(), Some((1.0, 0.5, 1.0)));
        assert_eq!(gradient.dim(), (4, 5, 6, 3));
        assert_eq!(gradient[[1, 2, 3, 0]], 2.0);
        assert_eq!(gradient[[1, 2, 3, 1]], 6.0);
        assert_eq!(gradient[[1, 2, 3, 2]], -1.0);
        // One-sided at the border with replicated neighbour.
        assert_eq!(gradient[[1, 2, 0, 0]], 1.0);
    }
}
