use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported encoding `{0}`, only raw payloads can be read")]
    UnsupportedEncoding(String),

    #[error("Unsupported sample type `{0}`")]
    UnsupportedType(String),

    #[error("Unsupported dimensionality {0}, expected a 3D volume")]
    UnsupportedDimensionality(i64),

    #[error("Unsupported endianness `{0}`")]
    UnsupportedEndian(String),

    #[error("Malformed `{field}` value: `{value}`")]
    MalformedField { field: &'static str, value: String },

    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Sizes must be three positive integers with an addressable product")]
    InvalidSizes,

    #[error("Spacings must be three positive finite numbers")]
    InvalidSpacings,
}

/// Sample type of the raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    UnsignedChar,
    UnsignedShort,
}

impl SampleType {
    /// Size of one sample in bytes
    pub fn size(self) -> usize {
        match self {
            SampleType::UnsignedChar => 1,
            SampleType::UnsignedShort => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleType::UnsignedChar => "unsigned char",
            SampleType::UnsignedShort => "unsigned short",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "unsigned char" | "uchar" | "uint8" | "uint8_t" => Some(SampleType::UnsignedChar),
            "unsigned short" | "unsigned short int" | "ushort" | "uint16" | "uint16_t" => {
                Some(SampleType::UnsignedShort)
            }
            _ => None,
        }
    }
}

/// Byte order of multi-byte samples in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// Metadata from a detached text header.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeHeader {
    /// Free text label from the `content` line
    pub content: String,
    pub sample_type: SampleType,
    pub endian: Endian,
    /// (width, height, depth)
    pub sizes: (usize, usize, usize),
    /// (x, y, z)
    pub spacing: (f32, f32, f32),
    /// Data file as written in the header
    pub data_file: PathBuf,
}

impl VolumeHeader {
    /// Number of voxels declared by `sizes`, saturating at `usize::MAX`.
    pub fn voxel_count(&self) -> usize {
        let (width, height, depth) = self.sizes;
        width.saturating_mul(height).saturating_mul(depth)
    }

    /// Resolve the data file against the directory of the header file.
    pub fn data_path(&self, header_path: &Path) -> PathBuf {
        match header_path.parent() {
            Some(dir) => dir.join(&self.data_file),
            None => self.data_file.clone(),
        }
    }
}

pub struct HeaderParser;

impl HeaderParser {
    /// Parse a header file from disk
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or declares an unsupported
    /// encoding, sample type or dimensionality.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<VolumeHeader, HeaderError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse_str(&text)
    }

    /// Parse header text line by line, stopping at the first violation.
    ///
    /// Unknown lines are ignored so newer header fields do not break reading.
    pub fn parse_str(text: &str) -> Result<VolumeHeader, HeaderError> {
        let mut encoding_seen = false;
        let mut content = String::new();
        let mut sample_type = None;
        let mut endian = Endian::default();
        let mut dimension_seen = false;
        let mut sizes = None;
        let mut spacing = None;
        let mut data_file = None;

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with('#') {
                continue;
            }
            let value = match line.split_once(':') {
                Some((_, value)) => value.trim(),
                None => continue,
            };

            if line.starts_with("encoding") {
                if !value.contains("raw") {
                    return Err(HeaderError::UnsupportedEncoding(value.to_owned()));
                }
                encoding_seen = true;
            } else if line.starts_with("content") {
                content = value.to_owned();
            } else if line.starts_with("type") {
                sample_type = Some(
                    SampleType::parse(value)
                        .ok_or_else(|| HeaderError::UnsupportedType(value.to_owned()))?,
                );
            } else if line.starts_with("endian") {
                endian = match value {
                    "little" => Endian::Little,
                    "big" => Endian::Big,
                    other => return Err(HeaderError::UnsupportedEndian(other.to_owned())),
                };
            } else if line.starts_with("sizes") {
                sizes = Some(Self::parse_sizes(value)?);
            } else if line.starts_with("spacings") {
                spacing = Some(Self::parse_spacings(value)?);
            } else if line.starts_with("dimension") {
                let dimension = value.parse::<i64>().map_err(|_| HeaderError::MalformedField {
                    field: "dimension",
                    value: value.to_owned(),
                })?;
                if dimension != 3 {
                    return Err(HeaderError::UnsupportedDimensionality(dimension));
                }
                dimension_seen = true;
            } else if line.starts_with("data file") || line.starts_with("datafile") {
                if value.is_empty() {
                    return Err(HeaderError::MissingField("data file"));
                }
                data_file = Some(PathBuf::from(value));
            } else {
                debug!(line, "Skipping unrecognized header line");
            }
        }

        if !encoding_seen {
            return Err(HeaderError::MissingField("encoding"));
        }
        if !dimension_seen {
            return Err(HeaderError::MissingField("dimension"));
        }

        Ok(VolumeHeader {
            content,
            sample_type: sample_type.ok_or(HeaderError::MissingField("type"))?,
            endian,
            sizes: sizes.ok_or(HeaderError::MissingField("sizes"))?,
            spacing: spacing.unwrap_or((1.0, 1.0, 1.0)),
            data_file: data_file.ok_or(HeaderError::MissingField("data file"))?,
        })
    }

    fn parse_sizes(value: &str) -> Result<(usize, usize, usize), HeaderError> {
        let sizes: Vec<usize> = value
            .split_whitespace()
            .map(|token| {
                token.parse::<usize>().map_err(|_| HeaderError::MalformedField {
                    field: "sizes",
                    value: value.to_owned(),
                })
            })
            .collect::<Result<_, _>>()?;

        let [width, height, depth] = sizes[..] else {
            return Err(HeaderError::InvalidSizes);
        };
        if width == 0 || height == 0 || depth == 0 {
            return Err(HeaderError::InvalidSizes);
        }
        // The payload byte count of the widest sample type must be addressable.
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(depth))
            .and_then(|n| n.checked_mul(SampleType::UnsignedShort.size()))
            .ok_or(HeaderError::InvalidSizes)?;

        Ok((width, height, depth))
    }

    fn parse_spacings(value: &str) -> Result<(f32, f32, f32), HeaderError> {
        let spacings: Vec<f32> = value
            .split_whitespace()
            .map(|token| {
                token.parse::<f32>().map_err(|_| HeaderError::MalformedField {
                    field: "spacings",
                    value: value.to_owned(),
                })
            })
            .collect::<Result<_, _>>()?;

        match spacings[..] {
            [x, y, z] if [x, y, z].iter().all(|s| s.is_finite() && *s > 0.0) => Ok((x, y, z)),
            _ => Err(HeaderError::InvalidSpacings),
        }
    }
}
