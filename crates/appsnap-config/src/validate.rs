//! Configuration validation errors and semantic validation.

use crate::BackendConfig;
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a backend configuration semantically.
///
/// The first problem found is returned; nothing is applied on error.
pub fn validate_config(config: &BackendConfig) -> ValidationResult<()> {
    if !config.root_dir.is_absolute() {
        return Err(ValidationError::invalid(
            "root_dir",
            format!("must be an absolute path, got {:?}", config.root_dir),
        ));
    }

    if let Some(ref dir) = config.snapshots_dir {
        if !dir.is_absolute() {
            return Err(ValidationError::invalid(
                "snapshots_dir",
                format!("must be an absolute path, got {:?}", dir),
            ));
        }
    }

    if config.tar_program.trim().is_empty() {
        return Err(ValidationError::invalid("tar_program", "must not be empty"));
    }

    if config.dir_batch_size == 0 {
        return Err(ValidationError::invalid(
            "dir_batch_size",
            "must be at least 1",
        ));
    }

    if let Some(ref level) = config.log.level {
        const LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "warning", "error", "off"];
        if !LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "log.level",
                format!("unknown log level {:?}", level),
            ));
        }
    }

    if let Some(ref format) = config.log.format {
        const FORMATS: [&str; 4] = ["human", "pretty", "jsonl", "json"];
        if !FORMATS.contains(&format.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "log.format",
                format!("unknown log format {:?}", format),
            ));
        }
    }

    Ok(())
}
