use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Resample to isotropic aspect ratio using the voxel spacing
    Bilinear,
    #[default]
    None,
}

/// Background preprocessing stages started once a volume is normalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Edges,
    Gradient,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Edges => f.write_str("edge detection"),
            Stage::Gradient => f.write_str("gradient estimation"),
        }
    }
}
