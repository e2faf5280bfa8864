//! Orchestrates the quality checks into reports, a composite score and an ML-readiness gate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{QualityWeights, ValidationConfig};
use crate::error::Result;
use crate::types::{Dataset, FindingCategory, ValidationFinding, ValueRange};
use crate::validation::{
    CheckContext, CheckOutcome, CompletenessChecker, DuplicateDetector, OutlierDetector, PhiDetector,
    RangeRegistry, RangeValidator, TemporalValidator, Validator,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Weighted composite in [0, 100].
    pub overall_score: f64,
    pub sub_scores: BTreeMap<FindingCategory, f64>,
    pub weights: QualityWeights,
    /// Set when strict mode zeroed the score, with the reason.
    pub hard_gate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub dataset_name: String,
    pub generated_at: DateTime<Utc>,
    pub n_rows: usize,
    pub n_columns: usize,
    pub strict_mode: bool,
    pub validation_passed: bool,
    pub quality_score: QualityScore,
    pub checks: Vec<CheckOutcome>,
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn findings_for(&self, category: FindingCategory) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(move |f| f.category == category)
    }

    pub fn finding_counts(&self) -> BTreeMap<FindingCategory, usize> {
        let mut counts = BTreeMap::new();
        for f in &self.findings {
            *counts.entry(f.category).or_insert(0) += 1;
        }
        counts
    }

    /// Whether every check on one axis passed. Axes without checks count as passed.
    pub fn category_passed(&self, category: FindingCategory) -> bool {
        self.checks
            .iter()
            .filter(|c| c.category == category)
            .all(|c| c.passed)
    }

    pub fn skipped_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .flat_map(|c| c.skipped.iter().map(String::as_str))
            .collect()
    }
}

/// Result of the cheap pre-flight gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickValidation {
    pub quick_validation_passed: bool,
    pub n_rows: usize,
    pub overall_completeness: f64,
    pub low_completeness_columns: Vec<String>,
    pub duplicate_rows: usize,
    pub range_violations: BTreeMap<String, usize>,
    pub completeness_issues: Vec<String>,
    pub statistical_issues: Vec<String>,
}

pub struct DataValidationEngine {
    config: ValidationConfig,
    validators: Vec<Box<dyn Validator>>,
    completeness: CompletenessChecker,
    duplicates: DuplicateDetector,
    ranges: RangeValidator,
}

impl DataValidationEngine {
    pub fn new(config: ValidationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Self {
        Self::build(ValidationConfig::default())
    }

    fn build(config: ValidationConfig) -> Self {
        let validators: Vec<Box<dyn Validator>> = vec![
            Box::new(PhiDetector::new(config.indirect_identifier_columns.clone())),
            Box::new(CompletenessChecker::new(config.completeness_threshold)),
            Box::new(OutlierDetector::new(
                config.outlier_method,
                config.iqr_multiplier,
                config.z_threshold,
                config.max_outlier_fraction,
            )),
            Box::new(RangeValidator::new(Self::range_registry(&config))),
            Box::new(Self::duplicate_detector(&config)),
            Box::new(TemporalValidator::new(config.max_visit_gap_days)),
        ];

        Self {
            completeness: CompletenessChecker::new(config.completeness_threshold),
            duplicates: Self::duplicate_detector(&config),
            ranges: RangeValidator::new(Self::range_registry(&config)),
            validators,
            config,
        }
    }

    fn range_registry(config: &ValidationConfig) -> RangeRegistry {
        let mut registry = RangeRegistry::clinical_defaults();
        for o in &config.range_overrides {
            registry.register(&o.column, &[], ValueRange::new(o.min, o.max));
        }
        registry
    }

    fn duplicate_detector(config: &ValidationConfig) -> DuplicateDetector {
        DuplicateDetector::new(
            config.duplicate_ignore_columns.clone(),
            config.near_duplicate_window_days,
        )
    }

    /// Append a custom check. Its score joins the axis named by its category.
    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Cheap pre-flight: completeness, exact duplicates and basic range checks.
    pub fn quick_validate(&self, dataset: &Dataset) -> QuickValidation {
        let ctx = CheckContext {
            patient_id_col: self.config.patient_id_col.as_deref(),
            visit_date_col: self.config.visit_date_col.as_deref(),
            strict_mode: false,
        };
        let overall_completeness = self.completeness.get_overall_completeness(dataset);
        let low_completeness_columns: Vec<String> = self
            .completeness
            .low_completeness_columns(dataset)
            .into_iter()
            .map(|c| c.column)
            .collect();
        let duplicate_rows = self.duplicates.detect_exact_duplicates(dataset).duplicate_rows;
        let (range_results, _) = self.ranges.check_dataset(dataset, &ctx);
        let range_violations: BTreeMap<String, usize> = range_results
            .into_iter()
            .filter(|r| r.check.violations > 0)
            .map(|r| (r.check.column, r.check.violations))
            .collect();

        let mut completeness_issues = Vec::new();
        let mut statistical_issues = Vec::new();
        if dataset.is_empty() {
            completeness_issues.push("dataset has no rows".to_string());
        }
        if overall_completeness < self.config.completeness_threshold {
            completeness_issues.push(format!(
                "overall completeness {:.1}% is below the required {:.1}%",
                overall_completeness * 100.0,
                self.config.completeness_threshold * 100.0
            ));
        }
        let duplicate_fraction = duplicate_rows as f64 / dataset.n_rows().max(1) as f64;
        if duplicate_fraction > self.config.max_duplicate_fraction {
            statistical_issues.push(format!("{duplicate_rows} exact duplicate row(s)"));
        }
        for (column, count) in &range_violations {
            statistical_issues.push(format!(
                "{count} value(s) in column '{column}' outside the plausible range"
            ));
        }

        let quick_validation_passed = completeness_issues.is_empty() && statistical_issues.is_empty();
        tracing::debug!(
            passed = quick_validation_passed,
            completeness = overall_completeness,
            duplicate_rows,
            "quick validation finished"
        );

        QuickValidation {
            quick_validation_passed,
            n_rows: dataset.n_rows(),
            overall_completeness,
            low_completeness_columns,
            duplicate_rows,
            range_violations,
            completeness_issues,
            statistical_issues,
        }
    }

    /// Run every registered check and compute the composite quality score.
    pub fn validate_dataset(&self, dataset: &Dataset, dataset_name: &str, patient_id_col: &str, visit_date_col: &str, strict_mode: bool) -> Result<ValidationReport> {
        dataset.require_column(patient_id_col)?;
        dataset.require_column(visit_date_col)?;
        let ctx = CheckContext {
            patient_id_col: Some(patient_id_col),
            visit_date_col: Some(visit_date_col),
            strict_mode,
        };
        Ok(self.run(dataset, dataset_name, &ctx))
    }

    fn run(&self, dataset: &Dataset, dataset_name: &str, ctx: &CheckContext<'_>) -> ValidationReport {
        if dataset.is_empty() {
            tracing::warn!(dataset = dataset_name, "validating a dataset with no rows");
        }

        let checks: Vec<CheckOutcome> = self
            .validators
            .iter()
            .map(|v| {
                let outcome = v.check(dataset, ctx);
                tracing::debug!(
                    validator = v.name(),
                    passed = outcome.passed,
                    score = outcome.score,
                    findings = outcome.findings.len(),
                    "check finished"
                );
                outcome
            })
            .collect();

        let quality_score = self.score(&checks, ctx.strict_mode);
        let findings: Vec<ValidationFinding> = checks.iter().flat_map(|c| c.findings.iter().cloned()).collect();
        let validation_passed = checks.iter().all(|c| c.passed)
            && quality_score.overall_score >= self.config.min_quality_score;

        tracing::info!(
            dataset = dataset_name,
            rows = dataset.n_rows(),
            score = quality_score.overall_score,
            findings = findings.len(),
            passed = validation_passed,
            "dataset validated"
        );

        ValidationReport {
            dataset_name: dataset_name.to_string(),
            generated_at: Utc::now(),
            n_rows: dataset.n_rows(),
            n_columns: dataset.n_columns(),
            strict_mode: ctx.strict_mode,
            validation_passed,
            quality_score,
            checks,
            findings,
        }
    }

    fn score(&self, checks: &[CheckOutcome], strict_mode: bool) -> QualityScore {
        let weights = self.config.weights;
        let mut sub_scores = BTreeMap::new();
        for category in FindingCategory::ALL {
            let score = checks
                .iter()
                .filter(|c| c.category == category)
                .map(|c| c.score.clamp(0.0, 1.0))
                .fold(1.0_f64, f64::min);
            sub_scores.insert(category, score);
        }

        let weighted: f64 = sub_scores
            .iter()
            .map(|(category, score)| weights.weight(*category) * score)
            .sum();
        let mut overall_score = (weighted * 100.0).clamp(0.0, 100.0);

        let mut hard_gate = None;
        if strict_mode {
            let phi_found = checks
                .iter()
                .any(|c| c.category == FindingCategory::Phi && (!c.passed || !c.findings.is_empty()));
            let temporal_failed = checks
                .iter()
                .any(|c| c.category == FindingCategory::Temporal && !c.passed);
            if phi_found {
                hard_gate = Some("direct identifiers detected".to_string());
            } else if temporal_failed {
                hard_gate = Some("visit sequence validation failed".to_string());
            }
            if hard_gate.is_some() {
                overall_score = 0.0;
            }
        }

        QualityScore {
            overall_score,
            sub_scores,
            weights,
            hard_gate,
        }
    }

    /// Readiness gate for model training. Issues are ordered PHI, completeness, statistical.
    pub fn validate_for_ml_training(&self, dataset: &Dataset) -> Result<(bool, Vec<String>)> {
        if let Some(col) = &self.config.patient_id_col {
            dataset.require_column(col)?;
        }
        if let Some(col) = &self.config.visit_date_col {
            dataset.require_column(col)?;
        }

        let quick = self.quick_validate(dataset);
        let ctx = CheckContext {
            patient_id_col: self.config.patient_id_col.as_deref(),
            visit_date_col: self.config.visit_date_col.as_deref(),
            strict_mode: false,
        };
        let report = self.run(dataset, "ml_training_candidate", &ctx);

        let mut issues: Vec<String> = report
            .findings_for(FindingCategory::Phi)
            .map(|f| format!("PHI detected: {}", f.message))
            .collect();
        issues.extend(quick.completeness_issues.iter().cloned());
        issues.extend(quick.statistical_issues.iter().cloned());
        if !report.category_passed(FindingCategory::Temporal) {
            issues.push("visit dates are not strictly increasing for every subject".to_string());
        }
        let score = report.quality_score.overall_score;
        if score < self.config.min_quality_score {
            issues.push(format!(
                "quality score {:.1} is below the minimum of {:.1}",
                score, self.config.min_quality_score
            ));
        }

        let is_ready = issues.is_empty();
        if !is_ready {
            tracing::warn!(issues = issues.len(), "dataset is not ready for training");
        }
        Ok((is_ready, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepError;
    use serde_json::{json, Value};

    fn cohort() -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        for s in 0..6 {
            for v in 0..3 {
                rows.push(vec![
                    json!(format!("S{s}")),
                    json!(format!("20{:02}-01-15", 18 + v)),
                    json!(60 + s),
                    json!(28 - v - (s % 2)),
                    json!(format!("site{}", s % 2)),
                ]);
            }
        }
        rows
    }

    fn dataset(rows: Vec<Vec<Value>>) -> Dataset {
        Dataset::from_rows(&["subject_id", "visit_date", "age", "mmse", "site"], rows).unwrap()
    }

    fn configured_engine() -> DataValidationEngine {
        DataValidationEngine::new(ValidationConfig {
            patient_id_col: Some("subject_id".into()),
            visit_date_col: Some("visit_date".into()),
            ..ValidationConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_clean_cohort_scores_full_marks() {
        let engine = DataValidationEngine::with_defaults();
        let report = engine
            .validate_dataset(&dataset(cohort()), "clean", "subject_id", "visit_date", false)
            .unwrap();
        assert!(report.validation_passed, "{:?}", report.findings);
        assert!((report.quality_score.overall_score - 100.0).abs() < 1e-9);
        assert_eq!(report.checks.len(), 6);
    }

    #[test]
    fn test_missing_key_column_is_shape_error() {
        let engine = DataValidationEngine::with_defaults();
        let err = engine
            .validate_dataset(&dataset(cohort()), "x", "RID", "visit_date", false)
            .unwrap_err();
        match err {
            PrepError::DataShape { column, .. } => assert_eq!(column.as_deref(), Some("RID")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_strict_mode_zeroes_score_on_phi() {
        let mut rows = cohort();
        rows[0][4] = json!("jane@clinic.org");
        let ds = dataset(rows);
        let engine = DataValidationEngine::with_defaults();

        let lenient = engine.validate_dataset(&ds, "phi", "subject_id", "visit_date", false).unwrap();
        assert!(lenient.quality_score.overall_score > 0.0);
        assert!(lenient.quality_score.overall_score <= 100.0);
        assert!(!lenient.validation_passed);

        let strict = engine.validate_dataset(&ds, "phi", "subject_id", "visit_date", true).unwrap();
        assert_eq!(strict.quality_score.overall_score, 0.0);
        assert!(strict.quality_score.hard_gate.is_some());
    }

    #[test]
    fn test_strict_mode_zeroes_score_on_temporal_failure() {
        let mut rows = cohort();
        rows[1][1] = rows[0][1].clone();
        let ds = dataset(rows);
        let strict = DataValidationEngine::with_defaults()
            .validate_dataset(&ds, "dup-visit", "subject_id", "visit_date", true)
            .unwrap();
        assert_eq!(strict.quality_score.overall_score, 0.0);
        assert!(!strict.category_passed(FindingCategory::Temporal));
    }

    #[test]
    fn test_mmse_out_of_range_finding() {
        let mut rows = cohort();
        rows[2][3] = json!(45);
        let report = DataValidationEngine::with_defaults()
            .validate_dataset(&dataset(rows), "range", "subject_id", "visit_date", false)
            .unwrap();
        let range: Vec<_> = report.findings_for(FindingCategory::Range).collect();
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].column.as_deref(), Some("mmse"));
        assert_eq!(range[0].rows, vec![2]);
    }

    #[test]
    fn test_quick_validate_flags_duplicates() {
        let mut rows = cohort();
        rows.push(rows[0].clone());
        let quick = DataValidationEngine::with_defaults().quick_validate(&dataset(rows));
        assert!(!quick.quick_validation_passed);
        assert_eq!(quick.duplicate_rows, 1);
    }

    #[test]
    fn test_ml_gate_orders_phi_first() {
        let mut rows = cohort();
        rows[0][4] = json!("a@b.com");
        rows[3][3] = json!(45);
        let (ready, issues) = configured_engine().validate_for_ml_training(&dataset(rows)).unwrap();
        assert!(!ready);
        assert!(issues[0].starts_with("PHI detected"));
        assert!(issues.iter().any(|i| i.contains("mmse")));
    }

    #[test]
    fn test_ml_gate_accepts_clean_cohort() {
        let (ready, issues) = configured_engine().validate_for_ml_training(&dataset(cohort())).unwrap();
        assert!(ready, "{issues:?}");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_empty_dataset_not_ready() {
        let ds = dataset(Vec::new());
        let (ready, issues) = configured_engine().validate_for_ml_training(&ds).unwrap();
        assert!(!ready);
        assert_eq!(issues[0], "dataset has no rows");
    }

    struct AlwaysFails;

    impl Validator for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn category(&self) -> FindingCategory {
            FindingCategory::Outlier
        }

        fn check(&self, _dataset: &Dataset, _ctx: &CheckContext<'_>) -> CheckOutcome {
            let mut outcome = CheckOutcome::new(self.name(), self.category());
            outcome.passed = false;
            outcome.score = 0.0;
            outcome
        }
    }

    #[test]
    fn test_custom_validator_joins_its_axis() {
        let engine = DataValidationEngine::with_defaults().with_validator(Box::new(AlwaysFails));
        let report = engine
            .validate_dataset(&dataset(cohort()), "custom", "subject_id", "visit_date", false)
            .unwrap();
        assert_eq!(report.quality_score.sub_scores[&FindingCategory::Outlier], 0.0);
        assert!((report.quality_score.overall_score - 90.0).abs() < 1e-9);
        assert!(!report.validation_passed);
    }
}
