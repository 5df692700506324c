use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::subspace::{BdMethod, SubspaceOptions};
use crate::domain::nonlin::{NonlinearBank, Polynomial, TanhDryFriction};
use crate::utils::error::{Result, VibError};
use crate::utils::validation::{
    validate_file_extension, validate_non_empty_string, validate_path, validate_positive_float,
    validate_positive_number, validate_range, Validate,
};

/// TOML description of one identification job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentConfig {
    pub job: JobConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub nonlinearity: Vec<NonlinearityConfig>,
    pub estimation: EstimationConfig,
    pub optimization: Option<OptimizationConfig>,
    pub stabilization: Option<StabilizationConfig>,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Headered CSV file with one column per channel.
    pub path: String,
    pub input_columns: Vec<String>,
    pub output_columns: Vec<String>,
    pub npp: usize,
    pub periods: usize,
    pub fs: f64,
    /// Excited lines; omit when `estimation.fmin/fmax` select a band instead.
    pub lines: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NonlinearityConfig {
    Polynomial { exponent: i32, w: Vec<f64> },
    TanhDryFriction { eps: f64, w: Vec<f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    pub order: usize,
    pub block_rows: usize,
    pub fmin: Option<f64>,
    pub fmax: Option<f64>,
    /// Estimate a direct feedthrough D (default true).
    pub feedthrough: Option<bool>,
    /// Weight the lines by the inverse periodic noise variance.
    pub weighting: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub enabled: bool,
    pub lambda: Option<f64>,
    pub max_iter: Option<usize>,
    pub ftol: Option<f64>,
    pub xtol: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationConfig {
    pub enabled: bool,
    pub orders: Vec<usize>,
    pub tol_frequency: Option<f64>,
    pub tol_damping: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: String,
    pub model_file: Option<String>,
    pub write_frf: Option<bool>,
    pub write_knl: Option<bool>,
    pub write_modes: Option<bool>,
    /// Output dof where the force acts, for the nonlinear coefficients.
    pub force_dof: Option<usize>,
}

impl IdentConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn band(&self) -> Option<(f64, f64)> {
        match (self.estimation.fmin, self.estimation.fmax) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        }
    }

    pub fn subspace_options(&self) -> SubspaceOptions {
        SubspaceOptions {
            bd_method: if self.estimation.feedthrough.unwrap_or(true) {
                BdMethod::Explicit
            } else {
                BdMethod::NoFeedthrough
            },
            weight: None,
        }
    }

    pub fn nonlin_bank(&self) -> Result<NonlinearBank> {
        let mut bank = NonlinearBank::new();
        for nl in &self.nonlinearity {
            match nl {
                NonlinearityConfig::Polynomial { exponent, w } => {
                    bank.add(Box::new(Polynomial::new(*exponent, w.clone())?));
                }
                NonlinearityConfig::TanhDryFriction { eps, w } => {
                    bank.add(Box::new(TanhDryFriction::new(*eps, w.clone())?));
                }
            }
        }
        Ok(bank)
    }
}

impl Validate for IdentConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("job.name", &self.job.name)?;

        validate_path("data.path", &self.data.path)?;
        validate_file_extension("data.path", &self.data.path, &["csv"])?;
        if self.data.input_columns.is_empty() || self.data.output_columns.is_empty() {
            return Err(VibError::MissingConfigError {
                field: "data.input_columns/output_columns".to_string(),
            });
        }
        validate_positive_number("data.npp", self.data.npp, 2)?;
        validate_positive_number("data.periods", self.data.periods, 1)?;
        validate_positive_float("data.fs", self.data.fs)?;

        validate_positive_number("estimation.order", self.estimation.order, 1)?;
        if self.estimation.block_rows <= self.estimation.order {
            return Err(VibError::InvalidConfigValueError {
                field: "estimation.block_rows".to_string(),
                value: self.estimation.block_rows.to_string(),
                reason: "block rows must exceed the model order".to_string(),
            });
        }
        let nyquist = self.data.fs / 2.0;
        if let Some((fmin, fmax)) = self.band() {
            validate_range("estimation.fmin", fmin, 0.0, nyquist)?;
            validate_range("estimation.fmax", fmax, 0.0, nyquist)?;
            if fmax <= fmin {
                return Err(VibError::InvalidConfigValueError {
                    field: "estimation.fmax".to_string(),
                    value: fmax.to_string(),
                    reason: "fmax must exceed fmin".to_string(),
                });
            }
        } else if self.data.lines.as_ref().map_or(true, |l| l.is_empty()) {
            return Err(VibError::MissingConfigError {
                field: "data.lines or estimation.fmin/fmax".to_string(),
            });
        }
        if self.estimation.weighting.unwrap_or(false) && self.data.periods < 2 {
            return Err(VibError::InvalidConfigValueError {
                field: "estimation.weighting".to_string(),
                value: "true".to_string(),
                reason: "weighting needs at least two measured periods".to_string(),
            });
        }

        if let Some(opt) = &self.optimization {
            if let Some(lambda) = opt.lambda {
                validate_positive_float("optimization.lambda", lambda)?;
            }
            if let Some(nmax) = opt.max_iter {
                validate_positive_number("optimization.max_iter", nmax, 1)?;
            }
        }

        if let Some(stab) = &self.stabilization {
            if stab.enabled && stab.orders.is_empty() {
                return Err(VibError::MissingConfigError {
                    field: "stabilization.orders".to_string(),
                });
            }
        }

        validate_path("output.dir", &self.output.dir)?;
        if let Some(dof) = self.output.force_dof {
            validate_range("output.force_dof", dof, 0, self.data.output_columns.len() - 1)?;
        }

        Ok(())
    }
}
