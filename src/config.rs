use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Parameters of the edge mask stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeOptions {
    /// Variance of the Gaussian applied before differentiation.
    pub variance: f32,
    /// Gradient magnitude a voxel needs to extend an edge.
    pub lower_threshold: f32,
    /// Gradient magnitude a voxel needs to start an edge.
    pub upper_threshold: f32,
    /// Radius in voxels of the ball used to thicken edges.
    pub dilation_radius: usize,
}

impl Default for EdgeOptions {
    fn default() -> Self {
        Self {
            variance: 1.0,
            lower_threshold: 0.05,
            upper_threshold: 0.1,
            dilation_radius: 1,
        }
    }
}

/// Parameters of the gradient stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientOptions {
    /// Standard deviation of the recursive Gaussian.
    pub sigma: f32,
}

impl Default for GradientOptions {
    fn default() -> Self {
        Self { sigma: 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub edges: EdgeOptions,
    pub gradient: GradientOptions,
    /// Measure filter widths and derivatives in physical units.
    pub use_spacing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            edges: EdgeOptions::default(),
            gradient: GradientOptions::default(),
            use_spacing: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let edges = &self.edges;
        if !(edges.variance.is_finite() && edges.variance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "edges.variance must be positive, got {}",
                edges.variance
            )));
        }
        if !(edges.lower_threshold >= 0.0 && edges.upper_threshold >= 0.0) {
            return Err(ConfigError::Invalid(
                "edge thresholds must not be negative".to_owned(),
            ));
        }
        if edges.lower_threshold > edges.upper_threshold {
            return Err(ConfigError::Invalid(format!(
                "edges.lower_threshold {} exceeds edges.upper_threshold {}",
                edges.lower_threshold, edges.upper_threshold
            )));
        }
        if !(self.gradient.sigma.is_finite() && self.gradient.sigma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "gradient.sigma must be positive, got {}",
                self.gradient.sigma
            )));
        }
        Ok(())
    }
}

/// Read and validate a JSON pipeline config.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let data = fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&data)?;
    config.validate()?;
    Ok(config)
}
