use thiserror::Error;

#[derive(Error, Debug)]
pub enum VibError {
    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Dimension mismatch: {message}")]
    ShapeError { message: String },

    #[error("Linear algebra failure: {message}")]
    LinalgError { message: String },

    #[error("Estimation error: {message}")]
    EstimationError { message: String },
}

/// How bad an error is, used by the CLI to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Data,
    Numerical,
    System,
}

impl VibError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            VibError::ConfigError { .. }
            | VibError::InvalidConfigValueError { .. }
            | VibError::MissingConfigError { .. } => ErrorSeverity::Medium,
            VibError::CsvError(_) | VibError::TomlError(_) | VibError::ShapeError { .. } => {
                ErrorSeverity::High
            }
            VibError::LinalgError { .. } | VibError::EstimationError { .. } => ErrorSeverity::High,
            VibError::IoError(_) | VibError::SerializationError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            VibError::ConfigError { .. }
            | VibError::InvalidConfigValueError { .. }
            | VibError::MissingConfigError { .. } => ErrorCategory::Configuration,
            VibError::CsvError(_) | VibError::TomlError(_) | VibError::ShapeError { .. } => {
                ErrorCategory::Data
            }
            VibError::LinalgError { .. } | VibError::EstimationError { .. } => {
                ErrorCategory::Numerical
            }
            VibError::IoError(_) | VibError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            VibError::ConfigError { .. } | VibError::MissingConfigError { .. } => {
                "Check the job TOML file against the documented schema".to_string()
            }
            VibError::InvalidConfigValueError { field, .. } => {
                format!("Fix the '{}' field in the job configuration", field)
            }
            VibError::CsvError(_) => {
                "Verify the measurement CSV has headers and numeric columns".to_string()
            }
            VibError::ShapeError { .. } => {
                "Check that npp * periods matches the record length and channel counts agree"
                    .to_string()
            }
            VibError::LinalgError { .. } => {
                "Try a lower model order, more block rows or a narrower frequency band"
                    .to_string()
            }
            VibError::EstimationError { .. } => {
                "Inspect the singular values and excited lines; the data may not support this order"
                    .to_string()
            }
            VibError::IoError(_) => "Check file paths and permissions".to_string(),
            VibError::SerializationError(_) | VibError::TomlError(_) => {
                "The file content is malformed; regenerate it".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            VibError::CsvError(e) => format!("Could not read the measurement data: {}", e),
            VibError::IoError(e) => format!("File system problem: {}", e),
            VibError::EstimationError { message } => {
                format!("Identification failed: {}", message)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VibError>;

impl VibError {
    pub fn shape(message: impl Into<String>) -> Self {
        VibError::ShapeError {
            message: message.into(),
        }
    }

    pub fn linalg(message: impl Into<String>) -> Self {
        VibError::LinalgError {
            message: message.into(),
        }
    }

    pub fn estimation(message: impl Into<String>) -> Self {
        VibError::EstimationError {
            message: message.into(),
        }
    }
}
