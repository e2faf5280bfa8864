//! Configuration for the validation engine and the feature pipeline.
//!
//! Both configs are plain values passed into constructors, so engines with different
//! thresholds can coexist in one process.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::preprocessing::imputation::{ImputationOrder, ImputationStrategy};
use crate::preprocessing::normalization::NormalizationMethod;
use crate::types::FindingCategory;
use crate::validation::outlier::OutlierMethod;

/// Weights of the six quality axes. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_phi_weight")]
    pub phi: f64,
    #[serde(default = "default_completeness_weight")]
    pub completeness: f64,
    #[serde(default = "default_outlier_weight")]
    pub outlier: f64,
    #[serde(default = "default_range_weight")]
    pub range: f64,
    #[serde(default = "default_duplicate_weight")]
    pub duplicate: f64,
    #[serde(default = "default_temporal_weight")]
    pub temporal: f64,
}

fn default_phi_weight() -> f64 { 0.25 }
fn default_completeness_weight() -> f64 { 0.25 }
fn default_outlier_weight() -> f64 { 0.10 }
fn default_range_weight() -> f64 { 0.15 }
fn default_duplicate_weight() -> f64 { 0.10 }
fn default_temporal_weight() -> f64 { 0.15 }

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            phi: default_phi_weight(),
            completeness: default_completeness_weight(),
            outlier: default_outlier_weight(),
            range: default_range_weight(),
            duplicate: default_duplicate_weight(),
            temporal: default_temporal_weight(),
        }
    }
}

impl QualityWeights {
    pub fn weight(&self, category: FindingCategory) -> f64 {
        match category {
            FindingCategory::Phi => self.phi,
            FindingCategory::Completeness => self.completeness,
            FindingCategory::Outlier => self.outlier,
            FindingCategory::Range => self.range,
            FindingCategory::Duplicate => self.duplicate,
            FindingCategory::Temporal => self.temporal,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let all = FindingCategory::ALL.map(|c| self.weight(c));
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PrepError::configuration("quality weights must be non-negative"));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PrepError::configuration(format!(
                "quality weights must sum to 1, got {sum:.4}"
            )));
        }
        Ok(())
    }
}

/// Range bound supplied from configuration for one column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeOverride {
    pub column: String,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: f64,
    #[serde(default)]
    pub outlier_method: OutlierMethod,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    #[serde(default = "default_max_outlier_fraction")]
    pub max_outlier_fraction: f64,
    #[serde(default)]
    pub max_duplicate_fraction: f64,
    #[serde(default = "default_max_visit_gap_days")]
    pub max_visit_gap_days: i64,
    #[serde(default = "default_near_duplicate_window_days")]
    pub near_duplicate_window_days: i64,
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,
    #[serde(default)]
    pub weights: QualityWeights,
    /// Subject column used by `validate_for_ml_training`.
    #[serde(default)]
    pub patient_id_col: Option<String>,
    /// Visit date column used by `validate_for_ml_training`.
    #[serde(default)]
    pub visit_date_col: Option<String>,
    #[serde(default)]
    pub duplicate_ignore_columns: Vec<String>,
    #[serde(default)]
    pub indirect_identifier_columns: Vec<String>,
    #[serde(default)]
    pub range_overrides: Vec<RangeOverride>,
}

fn default_completeness_threshold() -> f64 { 0.70 }
fn default_iqr_multiplier() -> f64 { 1.5 }
fn default_z_threshold() -> f64 { 3.0 }
fn default_max_outlier_fraction() -> f64 { 0.05 }
fn default_max_visit_gap_days() -> i64 { 3650 }
fn default_near_duplicate_window_days() -> i64 { 7 }
fn default_min_quality_score() -> f64 { 60.0 }

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            completeness_threshold: default_completeness_threshold(),
            outlier_method: OutlierMethod::default(),
            iqr_multiplier: default_iqr_multiplier(),
            z_threshold: default_z_threshold(),
            max_outlier_fraction: default_max_outlier_fraction(),
            max_duplicate_fraction: 0.0,
            max_visit_gap_days: default_max_visit_gap_days(),
            near_duplicate_window_days: default_near_duplicate_window_days(),
            min_quality_score: default_min_quality_score(),
            weights: QualityWeights::default(),
            patient_id_col: None,
            visit_date_col: None,
            duplicate_ignore_columns: Vec::new(),
            indirect_identifier_columns: Vec::new(),
            range_overrides: Vec::new(),
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PrepError::configuration(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<()> {
        check_fraction("completeness_threshold", self.completeness_threshold)?;
        check_fraction("max_outlier_fraction", self.max_outlier_fraction)?;
        check_fraction("max_duplicate_fraction", self.max_duplicate_fraction)?;
        if self.iqr_multiplier <= 0.0 || self.z_threshold <= 0.0 {
            return Err(PrepError::configuration(
                "outlier multipliers must be positive",
            ));
        }
        if self.max_visit_gap_days <= 0 || self.near_duplicate_window_days <= 0 {
            return Err(PrepError::configuration("day windows must be positive"));
        }
        if !(0.0..=100.0).contains(&self.min_quality_score) {
            return Err(PrepError::configuration(
                "min_quality_score must be within [0, 100]",
            ));
        }
        for o in &self.range_overrides {
            if o.min > o.max {
                return Err(PrepError::configuration(format!(
                    "range override for '{}' has min > max",
                    o.column
                )));
            }
        }
        self.weights.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub imputation_strategy: ImputationStrategy,
    #[serde(default)]
    pub normalization_method: NormalizationMethod,
    #[serde(default = "default_include_temporal")]
    pub include_temporal: bool,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_ridge_alpha")]
    pub ridge_alpha: f64,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default)]
    pub imputation_order: ImputationOrder,
    /// Score columns that get a rate-of-change feature. Defaults to cognitive columns.
    #[serde(default)]
    pub temporal_score_columns: Option<Vec<String>>,
}

fn default_include_temporal() -> bool { true }
fn default_max_iter() -> usize { 10 }
fn default_tolerance() -> f64 { 1e-3 }
fn default_ridge_alpha() -> f64 { 1.0 }
fn default_random_seed() -> u64 { 42 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            imputation_strategy: ImputationStrategy::default(),
            normalization_method: NormalizationMethod::default(),
            include_temporal: default_include_temporal(),
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
            ridge_alpha: default_ridge_alpha(),
            random_seed: default_random_seed(),
            imputation_order: ImputationOrder::default(),
            temporal_score_columns: None,
        }
    }
}

impl PipelineConfig {
    /// Build from the string names used by callers, e.g. `("iterative", "minmax")`.
    pub fn from_names(imputation: &str, normalization: &str, include_temporal: bool) -> Result<Self> {
        Ok(Self {
            imputation_strategy: imputation.parse()?,
            normalization_method: normalization.parse()?,
            include_temporal,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(PrepError::configuration("max_iter must be at least 1"));
        }
        if !(self.tolerance > 0.0) {
            return Err(PrepError::configuration("tolerance must be positive"));
        }
        if !(self.ridge_alpha > 0.0) {
            return Err(PrepError::configuration("ridge_alpha must be positive"));
        }
        Ok(())
    }
}

/// Top-level config file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl PrepConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PrepConfig = toml::from_str(raw)?;
        config.validation.validate()?;
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ValidationConfig::default().validate().unwrap();
        PipelineConfig::default().validate().unwrap();
        assert!((ValidationConfig::default().completeness_threshold - 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_toml_partial_override() {
        let cfg = PrepConfig::from_toml_str(
            r#"
            [validation]
            completeness_threshold = 0.8
            patient_id_col = "RID"

            [pipeline]
            imputation_strategy = "iterative"
            normalization_method = "minmax"
            include_temporal = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.validation.completeness_threshold, 0.8);
        assert_eq!(cfg.validation.patient_id_col.as_deref(), Some("RID"));
        assert_eq!(cfg.validation.min_quality_score, 60.0);
        assert_eq!(cfg.pipeline.imputation_strategy, ImputationStrategy::Iterative);
        assert_eq!(cfg.pipeline.normalization_method, NormalizationMethod::MinMax);
        assert!(!cfg.pipeline.include_temporal);
    }

    #[test]
    fn test_unknown_strategy_is_configuration_error() {
        let err = PipelineConfig::from_names("knn", "standard", true).unwrap_err();
        assert!(matches!(err, PrepError::Configuration(_)));
        let err = PipelineConfig::from_names("simple", "robust", true).unwrap_err();
        assert!(matches!(err, PrepError::Configuration(_)));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let cfg = ValidationConfig {
            weights: QualityWeights {
                phi: 0.5,
                ..QualityWeights::default()
            },
            ..ValidationConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PrepError::Configuration(_))));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let err = PrepConfig::from_toml_str("[validation]\ncompleteness_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, PrepError::Configuration(_)));
    }
}
