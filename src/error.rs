//! Error types for the cohort-prep crate.
//!
//! Only structural and configuration problems are errors. Quality observations about the
//! data itself are reported as [`crate::types::ValidationFinding`]s.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PrepError>;

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data shape error{}: {message}", column.as_ref().map(|c| format!(" in column '{c}'")).unwrap_or_default())]
    DataShape {
        column: Option<String>,
        message: String,
    },

    #[error("Fit state error: {0}")]
    FitState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PrepError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::DataShape {
            column: None,
            message: msg.into(),
        }
    }

    pub fn missing_column(column: impl Into<String>) -> Self {
        Self::DataShape {
            column: Some(column.into()),
            message: "column not present in dataset".to_string(),
        }
    }

    pub fn not_fitted() -> Self {
        Self::FitState("pipeline has not been fitted; call fit or fit_transform first".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_names_column() {
        let err = PrepError::missing_column("EXAMDATE");
        assert_eq!(
            err.to_string(),
            "Data shape error in column 'EXAMDATE': column not present in dataset"
        );
    }

    #[test]
    fn test_shape_error_without_column() {
        let err = PrepError::shape("dataset has no rows");
        assert_eq!(err.to_string(), "Data shape error: dataset has no rows");
    }
}
