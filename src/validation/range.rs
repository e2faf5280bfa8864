//! Domain-plausibility bounds for known clinical fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{as_number, is_missing, Dataset, FindingCategory, Severity, ValidationFinding, ValueRange};
use crate::validation::{CheckContext, CheckOutcome, Validator};

/// Suffixes dropped when matching a column name against the registry.
const IGNORED_SUFFIXES: &[&str] = &["_score", "_total", "_value", "_bl", "_baseline"];

/// (canonical name, aliases, min, max)
const CLINICAL_RANGES: &[(&str, &[&str], f64, f64)] = &[
    ("mmse", &["mini_mental_state_exam", "mini_mental", "mms"], 0.0, 30.0),
    ("moca", &["montreal_cognitive_assessment"], 0.0, 30.0),
    ("cdr", &["cdr_global", "cdglobal", "clinical_dementia_rating"], 0.0, 3.0),
    ("cdr_sb", &["cdrsb", "cdr_sum_of_boxes", "cdr_sob"], 0.0, 18.0),
    ("adas_cog_11", &["adas11", "adas_11", "adas_cog"], 0.0, 70.0),
    ("adas_cog_13", &["adas13", "adas_13"], 0.0, 85.0),
    ("faq", &["functional_activities_questionnaire"], 0.0, 30.0),
    ("gds", &["geriatric_depression_scale"], 0.0, 15.0),
    ("npi_q", &["npiq", "npi"], 0.0, 36.0),
    ("age", &["age_years", "age_at_visit"], 0.0, 120.0),
    ("education_years", &["pteducat", "education", "years_of_education"], 0.0, 30.0),
    ("bmi", &["body_mass_index"], 10.0, 80.0),
    ("systolic_bp", &["sbp", "systolic", "vssyst"], 50.0, 260.0),
    ("diastolic_bp", &["dbp", "diastolic", "vsdiast"], 20.0, 160.0),
    ("heart_rate", &["pulse", "hr", "vspulse"], 20.0, 250.0),
    ("apoe4", &["apoe4_alleles", "apoe_e4_count"], 0.0, 2.0),
    ("hba1c", &["a1c", "hemoglobin_a1c"], 3.0, 20.0),
];

/// Lowercase, collapse separators to `_`, trim.
pub fn normalize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub canonical: String,
    pub range: ValueRange,
}

/// Alias-insensitive lookup from column names to plausible ranges.
#[derive(Debug, Clone, Default)]
pub struct RangeRegistry {
    entries: Vec<RangeEntry>,
    aliases: HashMap<String, usize>,
}

impl RangeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn clinical_defaults() -> Self {
        let mut registry = Self::empty();
        for (canonical, aliases, min, max) in CLINICAL_RANGES {
            registry.register(canonical, aliases, ValueRange::new(*min, *max));
        }
        registry
    }

    /// Add or replace an entry. Later registrations win for shared aliases.
    pub fn register(&mut self, canonical: &str, aliases: &[&str], range: ValueRange) {
        let key = normalize_column_name(canonical);
        let idx = match self.aliases.get(&key) {
            Some(&idx) if self.entries[idx].canonical == key => {
                self.entries[idx].range = range;
                idx
            }
            _ => {
                self.entries.push(RangeEntry {
                    canonical: key.clone(),
                    range,
                });
                self.entries.len() - 1
            }
        };
        self.aliases.insert(key, idx);
        for alias in aliases {
            self.aliases.insert(normalize_column_name(alias), idx);
        }
    }

    pub fn lookup(&self, column: &str) -> Option<&RangeEntry> {
        let key = normalize_column_name(column);
        if let Some(&idx) = self.aliases.get(&key) {
            return Some(&self.entries[idx]);
        }
        IGNORED_SUFFIXES
            .iter()
            .filter_map(|suffix| key.strip_suffix(suffix))
            .find_map(|stem| self.aliases.get(stem))
            .map(|&idx| &self.entries[idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeCheck {
    pub column: String,
    /// Whether the column matched a known range. Unregistered columns pass by default.
    pub registered: bool,
    pub validated: bool,
    pub violations: usize,
    pub bounds: Option<ValueRange>,
}

pub struct RangeValidator {
    registry: RangeRegistry,
}

impl Default for RangeValidator {
    fn default() -> Self {
        Self::new(RangeRegistry::clinical_defaults())
    }
}

impl RangeValidator {
    pub fn new(registry: RangeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RangeRegistry {
        &self.registry
    }

    /// Count values strictly outside the registered bounds for `name`.
    pub fn validate_column(&self, values: &[f64], name: &str) -> RangeCheck {
        let bounds = self.registry.lookup(name).map(|e| e.range);
        Self::check_bounds(values, name, bounds)
    }

    fn check_bounds(values: &[f64], name: &str, bounds: Option<ValueRange>) -> RangeCheck {
        let violations = bounds
            .map(|range| values.iter().filter(|v| !range.contains(**v)).count())
            .unwrap_or(0);
        RangeCheck {
            column: name.to_string(),
            registered: bounds.is_some(),
            validated: violations == 0,
            violations,
            bounds,
        }
    }

    /// Range checks for every bounded numeric column, plus skip reasons for columns
    /// that could not be read as numbers.
    pub fn check_dataset(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> (Vec<ColumnRangeResult>, Vec<String>) {
        let mut results = Vec::new();
        let mut skipped = Vec::new();

        for (idx, name) in ctx.numeric_columns(dataset) {
            let bounds = dataset
                .descriptor(&name)
                .and_then(|d| d.valid_range)
                .or_else(|| self.registry.lookup(&name).map(|e| e.range));
            let Some(range) = bounds else {
                continue;
            };

            let mut rows = Vec::new();
            let mut values = Vec::new();
            let mut unparseable = 0usize;
            for (row, cell) in dataset.column_values(idx).enumerate() {
                match as_number(cell) {
                    Some(v) => {
                        if !range.contains(v) {
                            rows.push(row);
                        }
                        values.push(v);
                    }
                    None if !is_missing(cell) => unparseable += 1,
                    None => {}
                }
            }
            if unparseable > 0 {
                skipped.push(format!("column '{name}' has {unparseable} non-numeric value(s)"));
                continue;
            }

            results.push(ColumnRangeResult {
                check: Self::check_bounds(&values, &name, Some(range)),
                n_values: values.len(),
                rows,
            });
        }

        (results, skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRangeResult {
    #[serde(flatten)]
    pub check: RangeCheck,
    pub n_values: usize,
    /// Rows holding out-of-range values.
    pub rows: Vec<usize>,
}

impl Validator for RangeValidator {
    fn name(&self) -> &'static str {
        "range_validator"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Range
    }

    fn check(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(self.name(), self.category());
        let (results, skipped) = self.check_dataset(dataset, ctx);
        for reason in skipped {
            outcome.skip(reason);
        }

        let checked_values: usize = results.iter().map(|r| r.n_values).sum();
        let violations: usize = results.iter().map(|r| r.check.violations).sum();

        for result in results.iter().filter(|r| r.check.violations > 0) {
            let check = &result.check;
            let (min, max) = check.bounds.map(|b| (b.min, b.max)).unwrap_or((f64::NAN, f64::NAN));
            outcome.findings.push(
                ValidationFinding::new(
                    FindingCategory::Range,
                    Severity::Error,
                    format!(
                        "{} value(s) in column '{}' outside plausible range [{}, {}]",
                        check.violations, check.column, min, max
                    ),
                )
                .in_column(check.column.clone())
                .at_rows(result.rows.clone()),
            );
        }

        if checked_values > 0 {
            outcome.score = 1.0 - violations as f64 / checked_values as f64;
        }
        outcome.passed = violations == 0;
        outcome.with_details(&results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alias_insensitive_lookup() {
        let registry = RangeRegistry::clinical_defaults();
        for name in ["MMSE", "mmse_score", "MMSE Score", "Mini-Mental State Exam", "mmse_total"] {
            let entry = registry.lookup(name).unwrap_or_else(|| panic!("no match for {name}"));
            assert_eq!(entry.canonical, "mmse");
            assert_eq!(entry.range, ValueRange::new(0.0, 30.0));
        }
        assert_eq!(registry.lookup("CDR-SB").unwrap().canonical, "cdr_sb");
        assert_eq!(registry.lookup("CDGLOBAL").unwrap().range.max, 3.0);
        assert!(registry.lookup("hippocampus").is_none());
    }

    #[test]
    fn test_mmse_violation_counted() {
        let check = RangeValidator::default().validate_column(&[28.0, 45.0, 30.0, 0.0], "mmse_score");
        assert!(check.registered);
        assert!(!check.validated);
        assert_eq!(check.violations, 1);
        assert_eq!(check.bounds, Some(ValueRange::new(0.0, 30.0)));
    }

    #[test]
    fn test_unregistered_column_passes_explicitly() {
        let check = RangeValidator::default().validate_column(&[-1e9, 1e9], "mystery_marker");
        assert!(check.validated);
        assert_eq!(check.violations, 0);
        assert!(!check.registered);
        assert!(check.bounds.is_none());
    }

    #[test]
    fn test_register_overrides_range() {
        let mut registry = RangeRegistry::clinical_defaults();
        let before = registry.len();
        registry.register("mmse", &[], ValueRange::new(0.0, 25.0));
        assert_eq!(registry.len(), before);
        assert_eq!(registry.lookup("MMSE").unwrap().range.max, 25.0);
    }

    #[test]
    fn test_descriptor_range_wins() {
        use crate::types::{ColumnDescriptor, ColumnKind};
        let ds = Dataset::new(
            vec![ColumnDescriptor::new("ventricles", ColumnKind::Numeric).with_range(0.0, 100.0)],
            vec![vec![json!(50)], vec![json!(150)]],
        )
        .unwrap();
        let outcome = RangeValidator::default().check(&ds, &CheckContext::default());
        assert!(!outcome.passed);
        assert_eq!(outcome.findings[0].rows, vec![1]);
        assert_eq!(outcome.score, 0.5);
    }
}
