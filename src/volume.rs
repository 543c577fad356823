use crate::enums::Interpolation;
use crate::enums::Orientation;
use crate::interpolator::Interpolator;

use image::GrayImage;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;

/// Voxels as converted from the payload, in their original value range.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelField {
    data: Array3<f32>,
    spacing: (f32, f32, f32),
}

impl VoxelField {
    /// `data` is indexed as (depth, height, width) so that x varies fastest.
    pub fn new(data: Array3<f32>, spacing: (f32, f32, f32)) -> Self {
        Self { data, spacing }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_parts(self) -> (Array3<f32>, (f32, f32, f32)) {
        (self.data, self.spacing)
    }
}

/// A normalized volume with every voxel in `[0, 1]`.
///
/// Only [`Normalizer`](crate::normalize::Normalizer) builds one, and nothing
/// mutates it afterwards, so it can be shared between worker threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    spacing: (f32, f32, f32),
    raw_range: (f32, f32),
}

impl Volume {
    pub(crate) fn new(data: Array3<f32>, spacing: (f32, f32, f32), raw_range: (f32, f32)) -> Self {
        Self {
            data,
            spacing,
            raw_range,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Width, height and depth in voxels
    pub fn size(&self) -> (usize, usize, usize) {
        let (depth, height, width) = self.data.dim();
        (width, height, depth)
    }

    /// Voxel spacing (x, y, z)
    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Minimum and maximum of the data before normalization
    pub fn raw_range(&self) -> (f32, f32) {
        self.raw_range
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Voxels in row-major order, x fastest.
    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("normalized volumes are always in standard layout")
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        slice_from_axis(&self.data, index, orientation)
    }

    /// Render a slice as an 8-bit grayscale image.
    ///
    /// With [`Interpolation::Bilinear`] the coronal and sagittal slices are
    /// stretched to the isotropic aspect ratio given by the spacing.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
    ) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, orientation)?;
        slice_to_image(&slice, self.spacing, orientation, interpolation)
    }
}

pub(crate) fn slice_from_axis<T>(
    data: &Array3<T>,
    index: usize,
    orientation: Orientation,
) -> Option<ArrayView2<'_, T>> {
    let (depth, height, width) = data.dim();
    let slice = match orientation {
        Orientation::Axial if index < depth => data.slice(s![index, .., ..]),
        Orientation::Coronal if index < height => data.slice(s![.., index, ..]),
        Orientation::Sagittal if index < width => data.slice(s![.., .., index]),
        _ => return None,
    };
    Some(slice)
}

/// Convert a slice of `[0, 1]` values to a grayscale image, optionally
/// resampled to isotropic aspect ratio.
pub(crate) fn slice_to_image(
    slice: &ArrayView2<'_, f32>,
    spacing: (f32, f32, f32),
    orientation: Orientation,
    interpolation: Interpolation,
) -> Option<GrayImage> {
    let (height, width) = slice.dim();

    let (out_width, out_height) = match interpolation {
        Interpolation::None => (width as u32, height as u32),
        Interpolation::Bilinear => output_dimensions(spacing, slice.dim(), orientation),
    };

    let values = if (out_width as usize, out_height as usize) == (width, height) {
        slice.iter().copied().collect()
    } else {
        Interpolator::resample(slice, out_width, out_height)
    };

    let pixels = values.into_iter().map(to_u8).collect();
    GrayImage::from_raw(out_width, out_height, pixels)
}

// Returns (width, height) of the isotropic image for a slice of (rows, cols).
fn output_dimensions(
    spacing: (f32, f32, f32),
    slice_dim: (usize, usize),
    orientation: Orientation,
) -> (u32, u32) {
    let (rows, cols) = slice_dim;
    // Only the two in-plane extents matter, the third is a placeholder.
    let volume_dim = match orientation {
        Orientation::Axial => (1, rows, cols),
        Orientation::Coronal => (rows, 1, cols),
        Orientation::Sagittal => (rows, cols, 1),
    };
    let (depth, height, width) = Interpolator::isotropic_dimensions(spacing, volume_dim);
    match orientation {
        Orientation::Axial => (width, height),
        Orientation::Coronal => (width, depth),
        Orientation::Sagittal => (height, depth),
    }
}

#[inline]
fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_volume() -> Volume {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 12 + y * 4 + x) as f32 / 23.0);
        Volume::new(data, (1.0, 1.0, 2.0), (0.0, 23.0))
    }

    #[test]
    fn size_is_reported_width_first() {
        let volume = ramp_volume();
        assert_eq!(volume.dim(), (2, 3, 4));
        assert_eq!(volume.size(), (4, 3, 2));
        assert_eq!(volume.as_slice().len(), 24);
        assert_eq!(volume.as_slice()[1], 1.0 / 23.0);
    }

    #[test]
    fn slices_follow_orientation() {
        let volume = ramp_volume();
        assert_eq!(volume.get_slice_from_axis(1, Orientation::Axial).unwrap().dim(), (3, 4));
        assert_eq!(volume.get_slice_from_axis(0, Orientation::Coronal).unwrap().dim(), (2, 4));
        assert_eq!(volume.get_slice_from_axis(3, Orientation::Sagittal).unwrap().dim(), (2, 3));
        assert!(volume.get_slice_from_axis(2, Orientation::Axial).is_none());
        assert!(volume.get_slice_from_axis(4, Orientation::Sagittal).is_none());
    }

    #[test]
    fn images_scale_to_full_byte_range() {
        let volume = ramp_volume();
        let image = volume
            .get_image_from_axis(1, Orientation::Axial, Interpolation::None)
            .unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(3, 2).0[0], 255);
    }

    #[test]
    fn bilinear_images_respect_spacing() {
        let volume = ramp_volume();
        let image = volume
            .get_image_from_axis(0, Orientation::Coronal, Interpolation::Bilinear)
            .unwrap();
        // Two slices at twice the in-plane spacing become four rows.
        assert_eq!(image.dimensions(), (4, 4));
    }
}
