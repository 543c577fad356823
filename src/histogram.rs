use rayon::prelude::*;
use serde::Serialize;

use crate::volume::Volume;

/// Number of buckets covering `[0, 1]`.
pub const HISTOGRAM_BINS: usize = 256;

/// Intensity histogram of a normalized volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    freq: Vec<u64>,
    log_freq: Vec<f32>,
}

impl Histogram {
    pub fn from_volume(volume: &Volume) -> Self {
        Self::from_values(volume.as_slice())
    }

    /// Bin normalized values. Values outside `[0, 1]` land in the end buckets.
    pub fn from_values(values: &[f32]) -> Self {
        let freq = values
            .par_iter()
            .fold(
                || vec![0u64; HISTOGRAM_BINS],
                |mut counts, &v| {
                    counts[Self::bin_of(v)] += 1;
                    counts
                },
            )
            .reduce(
                || vec![0u64; HISTOGRAM_BINS],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
                    a
                },
            );

        let log_freq = freq.iter().map(|&c| (c as f32).ln_1p()).collect();

        Self { freq, log_freq }
    }

    /// Bucket index for a normalized value: `ceil(v * bins)` clamped to the
    /// last bucket, so 1.0 shares the top bucket instead of overflowing.
    #[inline]
    pub fn bin_of(value: f32) -> usize {
        let bin = (value * HISTOGRAM_BINS as f32).ceil();
        if bin.is_nan() || bin <= 0.0 {
            0
        } else {
            (bin as usize).min(HISTOGRAM_BINS - 1)
        }
    }

    pub fn nbins(&self) -> usize {
        self.freq.len()
    }

    /// Raw voxel counts per bucket
    pub fn frequencies(&self) -> &[u64] {
        &self.freq
    }

    /// `ln(1 + count)` per bucket
    pub fn log_frequencies(&self) -> &[f32] {
        &self.log_freq
    }

    pub fn total(&self) -> u64 {
        self.freq.iter().sum()
    }

    /// Largest log frequency, the usual scale for plotting.
    pub fn max_log_frequency(&self) -> f32 {
        self.log_freq.iter().copied().fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sum_to_voxel_count() {
        let values: Vec<f32> = (0..1000).map(|i| i as f32 / 999.0).collect();
        let histogram = Histogram::from_values(&values);
        assert_eq!(histogram.nbins(), HISTOGRAM_BINS);
        assert_eq!(histogram.total(), 1000);
    }

    #[test]
    fn unit_value_stays_in_last_bin() {
        assert_eq!(Histogram::bin_of(1.0), HISTOGRAM_BINS - 1);
        assert_eq!(Histogram::bin_of(0.0), 0);
        assert_eq!(Histogram::bin_of(1.0 / 512.0), 1);
        assert_eq!(Histogram::bin_of(f32::NAN), 0);

        let histogram = Histogram::from_values(&[1.0, 1.0, 0.0]);
        assert_eq!(histogram.frequencies()[HISTOGRAM_BINS - 1], 2);
        assert_eq!(histogram.frequencies()[0], 1);
    }

    #[test]
    fn log_curve_follows_counts() {
        let histogram = Histogram::from_values(&[0.5, 0.5, 0.5, 0.25]);
        let bin = Histogram::bin_of(0.5);
        assert!((histogram.log_frequencies()[bin] - 4.0f32.ln()).abs() < 1e-6);
        assert_eq!(histogram.log_frequencies()[Histogram::bin_of(0.75)], 0.0);
        assert_eq!(histogram.max_log_frequency(), histogram.log_frequencies()[bin]);
    }
}
