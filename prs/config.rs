// ========================================================================================
//                                   Run configuration
// ========================================================================================

use crate::elnet::SolverSettings;
use crate::regression::{RegressionError, validate_grids};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid hyperparameter grid: {0}")]
    Grid(#[from] RegressionError),
    #[error("Solver convergence threshold must be positive, found {0}.")]
    Threshold(f64),
    #[error("Solver iteration limit must be at least 1.")]
    MaxIterations,
}

/// Hyperparameters and policies of one lassosum run. Every field has a default, so a
/// configuration file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LassosumConfig {
    pub shrinkage: Vec<f64>,
    pub lambda: Vec<f64>,
    /// Drop A/T and C/G markers during matching.
    pub exclude_ambiguous: bool,
    /// Rescale coefficients to the per-allele dosage scale before scoring.
    pub destandardize: bool,
    /// Shrink correlations by (1 - local FDR) during pseudovalidation.
    pub fdr_shrinkage: bool,
    pub solver: SolverSettings,
}

impl Default for LassosumConfig {
    fn default() -> Self {
        Self {
            shrinkage: vec![0.2, 0.5, 0.9, 1.0],
            lambda: log_spaced_grid(0.001, 0.1, 20),
            exclude_ambiguous: true,
            destandardize: false,
            fdr_shrinkage: true,
            solver: SolverSettings::default(),
        }
    }
}

impl LassosumConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_grids(&self.shrinkage, &self.lambda)?;
        if !(self.solver.threshold.is_finite() && self.solver.threshold > 0.0) {
            return Err(ConfigError::Threshold(self.solver.threshold));
        }
        if self.solver.max_iterations == 0 {
            return Err(ConfigError::MaxIterations);
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }
}

/// `n` values evenly spaced on the log scale from `min` to `max`, inclusive.
pub fn log_spaced_grid(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let (lo, hi) = (min.ln(), max.ln());
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| (lo + step * i as f64).exp()).collect()
        }
    }
}
