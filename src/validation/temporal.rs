//! Per-subject visit-sequence consistency.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{as_date, as_subject, is_missing, Dataset, FindingCategory, Severity, ValidationFinding};
use crate::validation::{CheckContext, CheckOutcome, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalIssueKind {
    DuplicateVisitDate,
    OutOfOrder,
    ExcessiveGap,
    UnparseableDate,
}

impl TemporalIssueKind {
    /// Whether the issue breaks strict monotonicity.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::DuplicateVisitDate | Self::OutOfOrder)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalIssue {
    pub subject: String,
    pub kind: TemporalIssueKind,
    pub previous_date: Option<NaiveDate>,
    pub date: Option<NaiveDate>,
    pub rows: Vec<usize>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalReport {
    pub validation_passed: bool,
    pub subjects_checked: usize,
    pub issues: Vec<TemporalIssue>,
}

impl TemporalReport {
    pub fn violating_subjects(&self) -> Vec<&str> {
        let mut subjects: Vec<&str> = self
            .issues
            .iter()
            .filter(|i| i.kind.is_violation())
            .map(|i| i.subject.as_str())
            .collect();
        subjects.sort_unstable();
        subjects.dedup();
        subjects
    }
}

pub struct TemporalValidator {
    max_gap_days: i64,
}

impl Default for TemporalValidator {
    fn default() -> Self {
        Self::new(3650)
    }
}

impl TemporalValidator {
    pub fn new(max_gap_days: i64) -> Self {
        Self { max_gap_days }
    }

    /// Visits of each subject, in dataset order, must have strictly increasing dates.
    pub fn validate_date_sequences(&self, dataset: &Dataset, patient_id_col: &str, date_col: &str) -> Result<TemporalReport> {
        let pid = dataset.require_column(patient_id_col)?;
        let date = dataset.require_column(date_col)?;

        let mut issues = Vec::new();
        let mut visits: BTreeMap<String, Vec<(usize, NaiveDate)>> = BTreeMap::new();
        for (row_idx, row) in dataset.rows().iter().enumerate() {
            let Some(subject) = as_subject(&row[pid]) else {
                continue;
            };
            match as_date(&row[date]) {
                Some(d) => visits.entry(subject).or_default().push((row_idx, d)),
                None if !is_missing(&row[date]) => issues.push(TemporalIssue {
                    message: format!("subject {subject}: unparseable visit date in row {row_idx}"),
                    subject,
                    kind: TemporalIssueKind::UnparseableDate,
                    previous_date: None,
                    date: None,
                    rows: vec![row_idx],
                }),
                None => {}
            }
        }

        for (subject, seq) in &visits {
            for pair in seq.windows(2) {
                let (prev_row, prev) = pair[0];
                let (row, current) = pair[1];
                let gap = (current - prev).num_days();
                let kind = if gap == 0 {
                    TemporalIssueKind::DuplicateVisitDate
                } else if gap < 0 {
                    TemporalIssueKind::OutOfOrder
                } else if gap > self.max_gap_days {
                    TemporalIssueKind::ExcessiveGap
                } else {
                    continue;
                };
                let message = match kind {
                    TemporalIssueKind::DuplicateVisitDate => {
                        format!("subject {subject}: repeated visit date {current} (rows {prev_row}, {row})")
                    }
                    TemporalIssueKind::OutOfOrder => {
                        format!("subject {subject}: visit {current} recorded after {prev} (rows {prev_row}, {row})")
                    }
                    _ => format!(
                        "subject {subject}: {gap}-day gap between {prev} and {current} exceeds {} days",
                        self.max_gap_days
                    ),
                };
                issues.push(TemporalIssue {
                    subject: subject.clone(),
                    kind,
                    previous_date: Some(prev),
                    date: Some(current),
                    rows: vec![prev_row, row],
                    message,
                });
            }
        }

        let validation_passed = !issues.iter().any(|i| i.kind.is_violation());
        tracing::debug!(
            subjects = visits.len(),
            issues = issues.len(),
            passed = validation_passed,
            "visit sequences validated"
        );
        Ok(TemporalReport {
            validation_passed,
            subjects_checked: visits.len(),
            issues,
        })
    }
}

impl Validator for TemporalValidator {
    fn name(&self) -> &'static str {
        "temporal_validator"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Temporal
    }

    fn check(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(self.name(), self.category());
        let (Some(pid), Some(date)) = (ctx.patient_id_col, ctx.visit_date_col) else {
            outcome.skip("no subject/visit date columns configured");
            return outcome;
        };
        let report = match self.validate_date_sequences(dataset, pid, date) {
            Ok(report) => report,
            Err(e) => {
                outcome.skip(e.to_string());
                return outcome;
            }
        };

        for issue in &report.issues {
            let severity = if issue.kind.is_violation() {
                Severity::Error
            } else {
                Severity::Warning
            };
            outcome.findings.push(
                ValidationFinding::new(FindingCategory::Temporal, severity, issue.message.clone())
                    .in_column(date)
                    .at_rows(issue.rows.clone()),
            );
        }

        outcome.passed = report.validation_passed;
        if report.subjects_checked > 0 {
            let bad = report.violating_subjects().len();
            outcome.score = 1.0 - bad as f64 / report.subjects_checked as f64;
        }
        outcome.with_details(&report)
    }
}
