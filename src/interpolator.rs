use ndarray::ArrayView2;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Output size of an isotropic resampling, as (depth, height, width).
    ///
    /// `spacing` is (x, y, z) and `dim` is (depth, height, width).
    pub(crate) fn isotropic_dimensions(
        spacing: (f32, f32, f32),
        dim: (usize, usize, usize),
    ) -> (u32, u32, u32) {
        let (x_spacing, y_spacing, z_spacing) = spacing;
        let inv_min_spacing = 1.0 / x_spacing.min(y_spacing).min(z_spacing);

        let scaled = |count: usize, spacing: f32| -> u32 {
            ((count as f32 * spacing * inv_min_spacing).round() as u32).max(1)
        };

        (
            scaled(dim.0, z_spacing),
            scaled(dim.1, y_spacing),
            scaled(dim.2, x_spacing),
        )
    }

    #[inline]
    pub(crate) fn bilinear(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;

        let v0 = slice[[y0, x0]].mul_add(1.0 - dx, slice[[y0, x1]] * dx);
        let v1 = slice[[y1, x0]].mul_add(1.0 - dx, slice[[y1, x1]] * dx);

        v0.mul_add(1.0 - dy, v1 * dy)
    }

    /// Resample a slice to `width` x `height` with half-pixel centers.
    pub(crate) fn resample(slice: &ArrayView2<f32>, width: u32, height: u32) -> Vec<f32> {
        let (slice_height, slice_width) = slice.dim();
        let mut out = Vec::with_capacity(width as usize * height as usize);

        for y in 0..height {
            let src_y = ((y as f32 + 0.5) / height as f32 * slice_height as f32 - 0.5)
                .clamp(0.0, (slice_height - 1) as f32);
            for x in 0..width {
                let src_x = ((x as f32 + 0.5) / width as f32 * slice_width as f32 - 0.5)
                    .clamp(0.0, (slice_width - 1) as f32);
                out.push(Self::bilinear(slice, src_y, src_x));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn isotropic_dimensions_stretch_coarse_axes() {
        let dims = Interpolator::isotropic_dimensions((0.5, 0.5, 2.0), (10, 20, 30));
        assert_eq!(dims, (40, 20, 30));
    }

    #[test]
    fn bilinear_blends_neighbours() {
        let slice = array![[0.0f32, 1.0], [2.0, 3.0]];
        let view = slice.view();
        assert_eq!(Interpolator::bilinear(&view, 0.0, 0.0), 0.0);
        assert!((Interpolator::bilinear(&view, 0.5, 0.5) - 1.5).abs() < 1e-6);
        assert_eq!(Interpolator::bilinear(&view, 1.0, 1.0), 3.0);
    }

    #[test]
    fn resample_to_same_size_is_identity() {
        let slice = array![[0.0f32, 0.25], [0.5, 1.0]];
        let out = Interpolator::resample(&slice.view(), 2, 2);
        assert_eq!(out, vec![0.0, 0.25, 0.5, 1.0]);
    }
}
