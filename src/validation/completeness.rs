//! Missing-value ratios, dataset-wide and per column.

use serde::{Deserialize, Serialize};

use crate::types::{is_missing, Dataset, FindingCategory, Severity, ValidationFinding};
use crate::validation::{CheckContext, CheckOutcome, Validator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCompleteness {
    pub column: String,
    pub missing: usize,
    pub completeness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub overall_completeness: f64,
    pub threshold: f64,
    pub columns: Vec<ColumnCompleteness>,
    pub low_completeness_columns: Vec<String>,
}

pub struct CompletenessChecker {
    threshold: f64,
}

impl Default for CompletenessChecker {
    fn default() -> Self {
        Self::new(0.70)
    }
}

impl CompletenessChecker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Non-missing cells over total cells. An empty dataset has nothing missing: 1.0.
    pub fn get_overall_completeness(&self, dataset: &Dataset) -> f64 {
        let total = dataset.n_rows() * dataset.n_columns();
        if total == 0 {
            return 1.0;
        }
        let missing = dataset
            .rows()
            .iter()
            .flat_map(|row| row.iter())
            .filter(|v| is_missing(v))
            .count();
        (total - missing) as f64 / total as f64
    }

    pub fn column_completeness(&self, dataset: &Dataset) -> Vec<ColumnCompleteness> {
        let n = dataset.n_rows();
        dataset
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let missing = dataset.column_values(i).filter(|v| is_missing(v)).count();
                let completeness = if n == 0 {
                    1.0
                } else {
                    (n - missing) as f64 / n as f64
                };
                ColumnCompleteness {
                    column: col.name.clone(),
                    missing,
                    completeness,
                }
            })
            .collect()
    }

    /// Columns whose own completeness is under the threshold, regardless of the overall figure.
    pub fn low_completeness_columns(&self, dataset: &Dataset) -> Vec<ColumnCompleteness> {
        self.column_completeness(dataset)
            .into_iter()
            .filter(|c| c.completeness < self.threshold)
            .collect()
    }

    pub fn report(&self, dataset: &Dataset) -> CompletenessReport {
        let columns = self.column_completeness(dataset);
        let low_completeness_columns = columns
            .iter()
            .filter(|c| c.completeness < self.threshold)
            .map(|c| c.column.clone())
            .collect();
        CompletenessReport {
            overall_completeness: self.get_overall_completeness(dataset),
            threshold: self.threshold,
            columns,
            low_completeness_columns,
        }
    }
}

impl Validator for CompletenessChecker {
    fn name(&self) -> &'static str {
        "completeness_checker"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Completeness
    }

    fn check(&self, dataset: &Dataset, _ctx: &CheckContext<'_>) -> CheckOutcome {
        let report = self.report(dataset);
        let mut outcome = CheckOutcome::new(self.name(), self.category());

        outcome.score = report.overall_completeness;
        outcome.passed = report.overall_completeness >= self.threshold;
        if !outcome.passed {
            outcome.findings.push(ValidationFinding::new(
                FindingCategory::Completeness,
                Severity::Error,
                format!(
                    "overall completeness {:.1}% is below the {:.1}% threshold",
                    report.overall_completeness * 100.0,
                    self.threshold * 100.0
                ),
            ));
        }
        for col in report.columns.iter().filter(|c| c.completeness < self.threshold) {
            outcome.findings.push(
                ValidationFinding::new(
                    FindingCategory::Completeness,
                    Severity::Warning,
                    format!(
                        "column '{}' is {:.1}% complete ({} missing), below the {:.1}% threshold",
                        col.column,
                        col.completeness * 100.0,
                        col.missing,
                        self.threshold * 100.0
                    ),
                )
                .in_column(col.column.clone()),
            );
        }

        outcome.with_details(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_full_dataset_is_complete() {
        let ds = Dataset::from_rows(&["a", "b"], vec![vec![json!(1), json!(2)]]).unwrap();
        assert_eq!(CompletenessChecker::default().get_overall_completeness(&ds), 1.0);
    }

    #[test]
    fn test_empty_dataset_is_complete() {
        let ds = Dataset::from_rows(&["a"], Vec::new()).unwrap();
        assert_eq!(CompletenessChecker::default().get_overall_completeness(&ds), 1.0);
    }

    #[test]
    fn test_column_flagged_independently_of_overall() {
        // Column c is 50% missing; overall completeness is 10/12 ≈ 0.83.
        let rows = vec![
            vec![json!(1), json!(1), json!(1)],
            vec![json!(2), json!(2), Value::Null],
            vec![json!(3), json!(3), json!(3)],
            vec![json!(4), json!(4), json!("NA")],
        ];
        let ds = Dataset::from_rows(&["a", "b", "c"], rows).unwrap();
        let checker = CompletenessChecker::new(0.70);

        let overall = checker.get_overall_completeness(&ds);
        assert!(overall >= 0.70);
        assert!((0.0..=1.0).contains(&overall));

        let low = checker.low_completeness_columns(&ds);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].column, "c");
        assert_eq!(low[0].completeness, 0.5);

        let outcome = checker.check(&ds, &CheckContext::default());
        assert!(outcome.passed);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].column.as_deref(), Some("c"));
    }

    #[test]
    fn test_low_overall_fails() {
        let rows = vec![
            vec![json!(1), Value::Null],
            vec![Value::Null, Value::Null],
        ];
        let ds = Dataset::from_rows(&["a", "b"], rows).unwrap();
        let outcome = CompletenessChecker::new(0.7).check(&ds, &CheckContext::default());
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 0.25);
    }
}
