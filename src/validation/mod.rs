//! Dataset quality checks and the engine that composes them.
//!
//! Each checker exposes its own typed API (`detect_phi`, `detect_outliers_iqr`, ...) and
//! also implements [`Validator`], the uniform entry point the engine iterates over.

pub mod completeness;
pub mod duplicate;
pub mod engine;
pub mod outlier;
pub mod phi;
pub mod range;
pub mod temporal;

use serde::{Deserialize, Serialize};

use crate::types::{ColumnKind, Dataset, FindingCategory, ValidationFinding};

pub use completeness::CompletenessChecker;
pub use duplicate::DuplicateDetector;
pub use engine::{DataValidationEngine, QualityScore, QuickValidation, ValidationReport};
pub use outlier::OutlierDetector;
pub use phi::{PhiCategory, PhiDetector};
pub use range::{RangeRegistry, RangeValidator};
pub use temporal::TemporalValidator;

/// Caller-supplied context shared by all validators of one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckContext<'a> {
    pub patient_id_col: Option<&'a str>,
    pub visit_date_col: Option<&'a str>,
    pub strict_mode: bool,
}

impl<'a> CheckContext<'a> {
    /// Whether a column is one of the record-key columns of this run.
    pub fn is_key_column(&self, name: &str) -> bool {
        self.patient_id_col == Some(name) || self.visit_date_col == Some(name)
    }

    /// Numeric, non-key columns that statistical checks should look at.
    pub fn numeric_columns(&self, dataset: &Dataset) -> Vec<(usize, String)> {
        dataset
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Numeric && !self.is_key_column(&c.name))
            .map(|(i, c)| (i, c.name.clone()))
            .collect()
    }
}

/// Result of running one validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub validator: String,
    pub category: FindingCategory,
    pub passed: bool,
    /// Sub-score in [0, 1]; 1 means no problems on this axis.
    pub score: f64,
    pub findings: Vec<ValidationFinding>,
    /// Per-column failures, formatted as "check skipped: <reason>".
    pub skipped: Vec<String>,
    pub details: serde_json::Value,
}

impl CheckOutcome {
    pub fn new(validator: &str, category: FindingCategory) -> Self {
        Self {
            validator: validator.to_string(),
            category,
            passed: true,
            score: 1.0,
            findings: Vec::new(),
            skipped: Vec::new(),
            details: serde_json::Value::Null,
        }
    }

    pub fn skip(&mut self, reason: impl AsRef<str>) {
        let msg = format!("check skipped: {}", reason.as_ref());
        tracing::warn!(validator = %self.validator, "{}", msg);
        self.skipped.push(msg);
    }

    pub fn with_details<T: Serialize>(mut self, details: &T) -> Self {
        self.details = serde_json::to_value(details).unwrap_or(serde_json::Value::Null);
        self
    }
}

/// A pluggable quality check.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> FindingCategory;

    /// Run the check. Must not panic on well-formed datasets; column-level problems
    /// are recorded through [`CheckOutcome::skip`].
    fn check(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> CheckOutcome;
}
