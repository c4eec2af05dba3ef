use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// How the predictions of several synthetic neighbors are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightingScheme {
    /// Plain mean of every feasible neighbor.
    #[default]
    Uniform,
    /// Weights inversely proportional to each neighbor's held-out train error.
    Distance,
}

impl WeightingScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Distance => "distance",
        }
    }
}

impl fmt::Display for WeightingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeightingScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Self::Uniform),
            "distance" => Ok(Self::Distance),
            other => Err(ConfigError::UnknownWeighting(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown weighting scheme '{0}'. Expected one of: 'uniform', 'distance'.")]
    UnknownWeighting(String),
    #[error("n_neighbors must be at least 1.")]
    ZeroNeighbors,
    #[error("max_rank must be at least 1 when set.")]
    ZeroMaxRank,
    #[error("spectral_t must lie in (0, 1], got {0}.")]
    SpectralThresholdOutOfRange(f64),
    #[error("'{name}' must be a finite, non-negative number, got {value}.")]
    InvalidTolerance { name: &'static str, value: f64 },
    #[error("Clip bounds are inconsistent: min_value ({min}) exceeds max_value ({max}).")]
    InconsistentBounds { min: f64, max: f64 },
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Estimator hyperparameters. Frozen once handed to an estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnnConfig {
    /// Number of synthetic neighbors averaged per missing cell.
    pub n_neighbors: usize,
    pub weights: WeightingScheme,
    /// Shuffle anchor rows (seeded) before splitting them into neighbors.
    pub random_splits: bool,
    /// Spectral energy fraction retained when choosing the rank. `None` selects the
    /// universal singular value threshold.
    pub spectral_t: Option<f64>,
    /// Singular values at or below this floor never count towards the rank.
    pub min_singular_value: f64,
    /// Relative held-out residual of the target row allowed by the linear span test.
    pub linear_span_eps: f64,
    /// Relative residual of the target column allowed by the subspace inclusion test.
    pub subspace_eps: f64,
    pub max_rank: Option<usize>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub verbose: bool,
}

impl Default for SnnConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 1,
            weights: WeightingScheme::Uniform,
            random_splits: false,
            spectral_t: None,
            min_singular_value: 1e-7,
            linear_span_eps: 0.1,
            subspace_eps: 0.1,
            max_rank: None,
            min_value: None,
            max_value: None,
            verbose: false,
        }
    }
}

impl SnnConfig {
    /// Rejects configurations the estimator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_neighbors == 0 {
            return Err(ConfigError::ZeroNeighbors);
        }
        if self.max_rank == Some(0) {
            return Err(ConfigError::ZeroMaxRank);
        }
        if let Some(t) = self.spectral_t {
            if !(t > 0.0 && t <= 1.0) {
                return Err(ConfigError::SpectralThresholdOutOfRange(t));
            }
        }
        for (name, value) in [
            ("min_singular_value", self.min_singular_value),
            ("linear_span_eps", self.linear_span_eps),
            ("subspace_eps", self.subspace_eps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidTolerance { name, value });
            }
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(ConfigError::InconsistentBounds { min, max });
            }
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Clamps a prediction to the configured bounds.
    pub fn clip(&self, value: f64) -> f64 {
        let mut clipped = value;
        if let Some(max) = self.max_value {
            clipped = clipped.min(max);
        }
        if let Some(min) = self.min_value {
            clipped = clipped.max(min);
        }
        clipped
    }
}

/// Renders a float the way Python's `repr` does: shortest round-trip digits,
/// scientific notation outside `[1e-4, 1e16)` with a signed two-digit exponent.
pub(crate) fn python_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = value.abs();
    if value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{value:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let fixed = format!("{value}");
    if fixed.contains('.') {
        fixed
    } else {
        format!("{fixed}.0")
    }
}

pub(crate) fn python_option<T>(value: Option<T>, render: impl FnOnce(T) -> String) -> String {
    value.map_or_else(|| "None".to_string(), render)
}

pub(crate) fn python_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}
