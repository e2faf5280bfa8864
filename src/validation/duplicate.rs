//! Exact and near-duplicate record detection.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{as_date, as_subject, cell_key, Dataset, FindingCategory, Severity, ValidationFinding};
use crate::validation::{CheckContext, CheckOutcome, Validator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Row indices sharing one key; the first entry is the retained original.
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Rows minus distinct rows.
    pub duplicate_rows: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

/// Group row indices by key, keeping only groups with more than one member,
/// ordered by first occurrence.
fn group_rows<K: std::hash::Hash + Eq>(keys: impl Iterator<Item = (usize, K)>) -> DuplicateReport {
    let mut groups: HashMap<K, Vec<usize>> = HashMap::new();
    for (row, key) in keys {
        groups.entry(key).or_default().push(row);
    }
    let mut duplicate_groups: Vec<DuplicateGroup> = groups
        .into_values()
        .filter(|rows| rows.len() > 1)
        .map(|rows| DuplicateGroup { rows })
        .collect();
    duplicate_groups.sort_by_key(|g| g.rows[0]);
    let duplicate_rows = duplicate_groups.iter().map(|g| g.rows.len() - 1).sum();
    DuplicateReport {
        duplicate_rows,
        duplicate_groups,
    }
}

pub struct DuplicateDetector {
    ignore_columns: Vec<String>,
    near_window_days: i64,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(Vec::new(), 7)
    }
}

impl DuplicateDetector {
    /// `ignore_columns` (e.g. surrogate row ids) are excluded from the exact-match key.
    pub fn new(ignore_columns: Vec<String>, near_window_days: i64) -> Self {
        Self {
            ignore_columns,
            near_window_days: near_window_days.max(1),
        }
    }

    pub fn detect_exact_duplicates(&self, dataset: &Dataset) -> DuplicateReport {
        let compared: Vec<usize> = dataset
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.ignore_columns.contains(&c.name))
            .map(|(i, _)| i)
            .collect();

        group_rows(dataset.rows().iter().enumerate().map(|(i, row)| {
            let key: Vec<String> = compared.iter().map(|&c| cell_key(&row[c])).collect();
            (i, key)
        }))
    }

    /// Rows sharing a subject and a visit date.
    pub fn detect_key_duplicates(&self, dataset: &Dataset, patient_id_col: &str, visit_date_col: &str) -> Result<DuplicateReport> {
        let pid = dataset.require_column(patient_id_col)?;
        let date = dataset.require_column(visit_date_col)?;
        Ok(group_rows(dataset.rows().iter().enumerate().filter_map(|(i, row)| {
            let subject = as_subject(&row[pid])?;
            let visit = as_date(&row[date])?;
            Some((i, (subject, visit)))
        })))
    }

    /// Visits of one subject chained by gaps shorter than `window_days`.
    pub fn detect_near_duplicates(&self, dataset: &Dataset, patient_id_col: &str, visit_date_col: &str, window_days: Option<i64>) -> Result<DuplicateReport> {
        let window = window_days.unwrap_or(self.near_window_days).max(1);
        let pid = dataset.require_column(patient_id_col)?;
        let date = dataset.require_column(visit_date_col)?;

        let mut visits: Vec<(String, NaiveDate, usize)> = dataset
            .rows()
            .iter()
            .enumerate()
            .filter_map(|(i, row)| Some((as_subject(&row[pid])?, as_date(&row[date])?, i)))
            .collect();
        visits.sort();

        let mut clusters = Vec::with_capacity(visits.len());
        let mut cluster = 0usize;
        for (k, (subject, day, row)) in visits.iter().enumerate() {
            if let Some((prev_subject, prev_day, _)) = k.checked_sub(1).map(|p| &visits[p]) {
                if prev_subject != subject || day.signed_duration_since(*prev_day).num_days() >= window {
                    cluster += 1;
                }
            }
            clusters.push((*row, cluster));
        }
        clusters.sort_unstable();
        Ok(group_rows(clusters.into_iter()))
    }
}

#[derive(Serialize)]
struct DuplicateDetails<'a> {
    exact: &'a DuplicateReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_visit: Option<&'a DuplicateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    near: Option<&'a DuplicateReport>,
}

impl Validator for DuplicateDetector {
    fn name(&self) -> &'static str {
        "duplicate_detector"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Duplicate
    }

    fn check(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(self.name(), self.category());
        let exact = self.detect_exact_duplicates(dataset);

        for group in &exact.duplicate_groups {
            outcome.findings.push(
                ValidationFinding::new(
                    FindingCategory::Duplicate,
                    Severity::Warning,
                    format!(
                        "row {} is repeated {} time(s)",
                        group.rows[0],
                        group.rows.len() - 1
                    ),
                )
                .at_rows(group.rows.clone()),
            );
        }

        let mut keyed = None;
        let mut near = None;
        if let (Some(pid), Some(date)) = (ctx.patient_id_col, ctx.visit_date_col) {
            match self.detect_key_duplicates(dataset, pid, date) {
                Ok(report) => {
                    let severity = if ctx.strict_mode { Severity::Error } else { Severity::Warning };
                    for group in &report.duplicate_groups {
                        outcome.findings.push(
                            ValidationFinding::new(
                                FindingCategory::Duplicate,
                                severity,
                                format!("{} rows share one (subject, visit date) pair", group.rows.len()),
                            )
                            .at_rows(group.rows.clone()),
                        );
                    }
                    keyed = Some(report);
                }
                Err(e) => outcome.skip(format!("subject/visit duplicate scan: {e}")),
            }
            match self.detect_near_duplicates(dataset, pid, date, None) {
                Ok(report) => near = Some(report),
                Err(e) => outcome.skip(format!("near-duplicate scan: {e}")),
            }
        }

        let n = dataset.n_rows();
        if n > 0 {
            outcome.score = 1.0 - exact.duplicate_rows as f64 / n as f64;
        }
        outcome.passed = exact.duplicate_rows == 0;

        let details = DuplicateDetails {
            exact: &exact,
            subject_visit: keyed.as_ref(),
            near: near.as_ref(),
        };
        outcome.with_details(&details)
    }
}
