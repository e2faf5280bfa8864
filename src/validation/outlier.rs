//! Per-column statistical outliers (Tukey fences, z-score alternative).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::types::{as_number, is_missing, Dataset, FindingCategory, Severity, ValidationFinding};
use crate::validation::{CheckContext, CheckOutcome, Validator};

/// Minimum number of values for a column to be screened.
const MIN_VALUES: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    #[default]
    Iqr,
    Zscore,
}

impl FromStr for OutlierMethod {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iqr" => Ok(Self::Iqr),
            "zscore" | "z-score" | "z_score" => Ok(Self::Zscore),
            other => Err(PrepError::configuration(format!("unknown outlier method '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IqrStats {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ZScoreStats {
    pub mean: f64,
    pub std: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOutliers {
    pub column: String,
    pub n_values: usize,
    pub outlier_rows: Vec<usize>,
}

/// Linear-interpolated quantile of sorted data.
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn has_variance(values: &[f64]) -> bool {
    values.windows(2).any(|w| w[0] != w[1])
}

pub struct OutlierDetector {
    method: OutlierMethod,
    iqr_multiplier: f64,
    z_threshold: f64,
    max_outlier_fraction: f64,
}

impl Default for OutlierDetector {
    fn default() -> Self {
        Self::new(OutlierMethod::Iqr, 1.5, 3.0, 0.05)
    }
}

impl OutlierDetector {
    pub fn new(method: OutlierMethod, iqr_multiplier: f64, z_threshold: f64, max_outlier_fraction: f64) -> Self {
        Self {
            method,
            iqr_multiplier,
            z_threshold,
            max_outlier_fraction,
        }
    }

    /// Tukey fences at Q1 - k·IQR and Q3 + k·IQR. Short or constant columns flag nothing.
    pub fn detect_outliers_iqr(&self, values: &[f64]) -> (Vec<bool>, IqrStats) {
        let mut mask = vec![false; values.len()];
        if values.len() < MIN_VALUES || !has_variance(values) {
            return (mask, IqrStats::default());
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        let stats = IqrStats {
            q1,
            q3,
            iqr,
            lower_bound: q1 - self.iqr_multiplier * iqr,
            upper_bound: q3 + self.iqr_multiplier * iqr,
        };

        for (flag, v) in mask.iter_mut().zip(values) {
            *flag = *v < stats.lower_bound || *v > stats.upper_bound;
        }
        (mask, stats)
    }

    /// |x - mean| / std above the threshold. Short or constant columns flag nothing.
    pub fn detect_outliers_zscore(&self, values: &[f64]) -> (Vec<bool>, ZScoreStats) {
        let mut mask = vec![false; values.len()];
        if values.len() < MIN_VALUES || !has_variance(values) {
            return (mask, ZScoreStats {
                threshold: self.z_threshold,
                ..ZScoreStats::default()
            });
        }

        let (mean, std) = mean_std(values);
        for (flag, v) in mask.iter_mut().zip(values) {
            *flag = std > 0.0 && ((v - mean) / std).abs() > self.z_threshold;
        }
        (mask, ZScoreStats {
            mean,
            std,
            threshold: self.z_threshold,
        })
    }

    fn detect(&self, values: &[f64]) -> Vec<bool> {
        match self.method {
            OutlierMethod::Iqr => self.detect_outliers_iqr(values).0,
            OutlierMethod::Zscore => self.detect_outliers_zscore(values).0,
        }
    }
}

impl Validator for OutlierDetector {
    fn name(&self) -> &'static str {
        "outlier_detector"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Outlier
    }

    fn check(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(self.name(), self.category());
        let mut report = Vec::new();
        let mut screened = 0usize;
        let mut flagged = 0usize;

        for (idx, name) in ctx.numeric_columns(dataset) {
            let mut rows = Vec::new();
            let mut values = Vec::new();
            let mut unparseable = 0usize;
            for (row, cell) in dataset.column_values(idx).enumerate() {
                match as_number(cell) {
                    Some(v) => {
                        rows.push(row);
                        values.push(v);
                    }
                    None if !is_missing(cell) => unparseable += 1,
                    None => {}
                }
            }
            if unparseable > 0 {
                outcome.skip(format!("column '{name}' has {unparseable} non-numeric value(s)"));
                continue;
            }

            let mask = self.detect(&values);
            let outlier_rows: Vec<usize> = rows
                .iter()
                .zip(&mask)
                .filter(|(_, m)| **m)
                .map(|(r, _)| *r)
                .collect();
            screened += values.len();
            flagged += outlier_rows.len();

            if !outlier_rows.is_empty() {
                tracing::debug!(column = %name, count = outlier_rows.len(), "outliers detected");
                outcome.findings.push(
                    ValidationFinding::new(
                        FindingCategory::Outlier,
                        Severity::Warning,
                        format!(
                            "{} outlier(s) out of {} value(s) in column '{}'",
                            outlier_rows.len(),
                            values.len(),
                            name
                        ),
                    )
                    .in_column(name.clone())
                    .at_rows(outlier_rows.clone()),
                );
            }
            report.push(ColumnOutliers {
                column: name,
                n_values: values.len(),
                outlier_rows,
            });
        }

        let fraction = if screened == 0 {
            0.0
        } else {
            flagged as f64 / screened as f64
        };
        outcome.score = 1.0 - fraction;
        outcome.passed = fraction <= self.max_outlier_fraction;
        outcome.with_details(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDescriptor, ColumnKind};
    use serde_json::json;

    #[test]
    fn test_constant_column_has_no_outliers() {
        let (mask, stats) = OutlierDetector::default().detect_outliers_iqr(&[5.0; 10]);
        assert!(mask.iter().all(|m| !m));
        assert_eq!(stats.iqr, 0.0);
    }

    #[test]
    fn test_short_column_has_no_outliers() {
        let (mask, _) = OutlierDetector::default().detect_outliers_iqr(&[1.0, 2.0, 1000.0]);
        assert_eq!(mask, vec![false, false, false]);
    }

    #[test]
    fn test_tukey_fences() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 100.0];
        let (mask, stats) = OutlierDetector::default().detect_outliers_iqr(&values);
        assert_eq!(stats.q1, 3.0);
        assert_eq!(stats.q3, 7.0);
        assert_eq!(stats.iqr, 4.0);
        assert_eq!(stats.lower_bound, -3.0);
        assert_eq!(stats.upper_bound, 13.0);
        assert_eq!(mask.iter().filter(|m| **m).count(), 1);
        assert!(mask[8]);
    }

    #[test]
    fn test_zscore_alternative() {
        let mut values = vec![10.0; 20];
        values[0] = 11.0;
        values[19] = 60.0;
        let (mask, stats) = OutlierDetector::default().detect_outliers_zscore(&values);
        assert!(mask[19]);
        assert!(!mask[0]);
        assert!(stats.std > 0.0);
    }

    #[test]
    fn test_non_numeric_column_is_skipped_not_fatal() {
        let ds = Dataset::new(
            vec![
                ColumnDescriptor::new("abeta", ColumnKind::Numeric),
                ColumnDescriptor::new("age", ColumnKind::Numeric),
            ],
            vec![
                vec![json!(">1700"), json!(70)],
                vec![json!(900), json!(71)],
                vec![json!(850), json!(72)],
                vec![json!(800), json!(73)],
            ],
        )
        .unwrap();
        let outcome = OutlierDetector::default().check(&ds, &CheckContext::default());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].starts_with("check skipped: column 'abeta'"));
        assert!(outcome.passed);
    }
}
