use crate::{
    header::{Endian, HeaderError, HeaderParser, SampleType, VolumeHeader},
    volume::VoxelField,
};

use ndarray::Array3;
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Samples read from the payload per block.
pub const IO_BLOCK_SAMPLES: usize = 4096;

/// Errors of a volume load.
///
/// Every filesystem failure, for the header as well as the payload, is
/// reported as [`VolumeLoaderError::Io`]; [`VolumeLoaderError::Header`] only
/// carries rejected header content.
#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("Header error: {0}")]
    Header(#[source] HeaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload holds {found} samples, header declares {expected}")]
    TruncatedPayload { expected: usize, found: usize },
}

impl From<HeaderError> for VolumeLoaderError {
    fn from(e: HeaderError) -> Self {
        match e {
            HeaderError::Io(e) => VolumeLoaderError::Io(e),
            e => VolumeLoaderError::Header(e),
        }
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from a detached header and its raw data file
    ///
    /// # Arguments
    ///
    /// * `header_path` - Path to the text header, the data file is resolved
    ///   relative to its directory
    ///
    /// # Errors
    ///
    /// Returns error if the header is rejected or the payload cannot be read
    /// in full. The payload is not opened when the header is invalid.
    pub fn load(
        header_path: impl AsRef<Path>,
    ) -> Result<(VolumeHeader, VoxelField), VolumeLoaderError> {
        let header_path = header_path.as_ref();
        let header = HeaderParser::parse_file(header_path)?;
        info!(
            path = %header_path.display(),
            name = %header.content,
            sample_type = header.sample_type.name(),
            size = ?header.sizes,
            spacing = ?header.spacing,
            "Read volume header"
        );

        let field = Self::load_raw(header.data_path(header_path), &header)?;
        Ok((header, field))
    }

    /// Read the payload described by `header` from `path`
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_raw(
        path: impl AsRef<Path>,
        header: &VolumeHeader,
    ) -> Result<VoxelField, VolumeLoaderError> {
        let file = File::open(path.as_ref())?;

        // Reject a short payload before any sample buffer is allocated.
        let expected = header.voxel_count();
        let sample_size = header.sample_type.size();
        let available = usize::try_from(file.metadata()?.len()).unwrap_or(usize::MAX);
        if available / sample_size < expected {
            return Err(VolumeLoaderError::TruncatedPayload {
                expected,
                found: available / sample_size,
            });
        }

        let samples = Self::read_samples(file, header)?;

        let (width, height, depth) = header.sizes;
        let data = Array3::from_shape_vec((depth, height, width), samples)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(VoxelField::new(data, header.spacing))
    }

    /// Convert samples from `reader` block by block until the declared voxel
    /// count is reached.
    pub fn read_samples(
        mut reader: impl Read,
        header: &VolumeHeader,
    ) -> Result<Vec<f32>, VolumeLoaderError> {
        let expected = header.voxel_count();
        let sample_size = header.sample_type.size();
        let swap = header.endian != Endian::native();

        // Grows with the data actually read, the declared count is untrusted.
        let mut samples = Vec::with_capacity(expected.min(IO_BLOCK_SAMPLES));
        let mut block = vec![0u16; IO_BLOCK_SAMPLES];

        while samples.len() < expected {
            let wanted = (expected - samples.len()).min(IO_BLOCK_SAMPLES);
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut block[..]);
            let bytes = &mut bytes[..wanted * sample_size];

            let filled = Self::fill_block(&mut reader, bytes)?;
            let count = filled / sample_size;

            match header.sample_type {
                SampleType::UnsignedChar => {
                    samples.extend(bytes[..count].iter().map(|&v| v as f32));
                }
                SampleType::UnsignedShort => {
                    samples.extend(block[..count].iter().map(|&v| {
                        let v = if swap { v.swap_bytes() } else { v };
                        v as f32
                    }));
                }
            }

            // A short block means the payload ended.
            if count < wanted {
                return Err(VolumeLoaderError::TruncatedPayload {
                    expected,
                    found: samples.len(),
                });
            }
        }

        let mut probe = [0u8; 1];
        if reader.read(&mut probe)? > 0 {
            warn!(expected, "Payload has trailing bytes after the declared samples");
        }

        Ok(samples)
    }

    // Read until `buf` is full or the reader hits end of file.
    fn fill_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn header(
        sample_type: SampleType,
        endian: Endian,
        sizes: (usize, usize, usize),
    ) -> VolumeHeader {
        VolumeHeader {
            content: "test".to_owned(),
            sample_type,
            endian,
            sizes,
            spacing: (1.0, 1.0, 1.0),
            data_file: PathBuf::from("test.raw"),
        }
    }

    #[test]
    fn converts_unsigned_char_samples() {
        let header = header(SampleType::UnsignedChar, Endian::Little, (2, 2, 1));
        let samples = VolumeLoader::read_samples(&[0u8, 85, 170, 255][..], &header).unwrap();
        assert_eq!(samples, vec![0.0, 85.0, 170.0, 255.0]);
    }

    #[test]
    fn converts_unsigned_short_samples_in_both_byte_orders() {
        let little = header(SampleType::UnsignedShort, Endian::Little, (3, 1, 1));
        let bytes = [0x01u8, 0x00, 0x00, 0x01, 0xff, 0xff];
        assert_eq!(
            VolumeLoader::read_samples(&bytes[..], &little).unwrap(),
            vec![1.0, 256.0, 65535.0]
        );

        let big = header(SampleType::UnsignedShort, Endian::Big, (3, 1, 1));
        assert_eq!(
            VolumeLoader::read_samples(&bytes[..], &big).unwrap(),
            vec![256.0, 1.0, 65535.0]
        );
    }

    #[test]
    fn reads_across_block_boundaries() {
        let count = IO_BLOCK_SAMPLES * 2 + 17;
        let header = header(SampleType::UnsignedShort, Endian::Little, (count, 1, 1));
        let bytes: Vec<u8> = (0..count)
            .flat_map(|i| (i as u16).to_le_bytes())
            .collect();
        let samples = VolumeLoader::read_samples(&bytes[..], &header).unwrap();
        assert_eq!(samples.len(), count);
        assert!(samples.iter().enumerate().all(|(i, &v)| v == i as u16 as f32));
    }

    #[test]
    fn short_payload_is_rejected() {
        let header = header(SampleType::UnsignedShort, Endian::Little, (4, 1, 1));
        let err = VolumeLoader::read_samples(&[1u8, 0, 2, 0, 3][..], &header).unwrap_err();
        assert!(matches!(
            err,
            VolumeLoaderError::TruncatedPayload { expected: 4, found: 2 }
        ));
    }

    #[test]
    fn declared_count_does_not_preallocate() {
        let sizes = (100_000, 100_000, 100_000);
        let header = header(SampleType::UnsignedChar, Endian::Little, sizes);
        let err = VolumeLoader::read_samples(&[1u8, 2, 3, 4][..], &header).unwrap_err();
        assert!(matches!(
            err,
            VolumeLoaderError::TruncatedPayload { expected: 1_000_000_000_000_000, found: 4 }
        ));
    }

    #[test]
    fn header_io_errors_are_io_errors() {
        let err = VolumeLoaderError::from(HeaderError::Io(io::ErrorKind::NotFound.into()));
        assert!(matches!(err, VolumeLoaderError::Io(e) if e.kind() == io::ErrorKind::NotFound));
        let err = VolumeLoaderError::from(HeaderError::InvalidSizes);
        assert!(matches!(err, VolumeLoaderError::Header(HeaderError::InvalidSizes)));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let header = header(SampleType::UnsignedChar, Endian::Little, (2, 1, 1));
        let samples = VolumeLoader::read_samples(&[7u8, 9, 11, 13][..], &header).unwrap();
        assert_eq!(samples, vec![7.0, 9.0]);
    }
}
