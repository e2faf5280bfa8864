//! Direct-identifier (PHI) scanning over string cells.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{as_date, as_text, ColumnDescriptor, Dataset, FindingCategory, Severity, ValidationFinding};
use crate::validation::{CheckContext, CheckOutcome, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiCategory {
    EmailAddresses,
    PhoneNumbers,
    GovernmentIds,
    FullNames,
    DatesOfBirth,
    StreetAddresses,
}

impl PhiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhiCategory::EmailAddresses => "email_addresses",
            PhiCategory::PhoneNumbers => "phone_numbers",
            PhiCategory::GovernmentIds => "government_ids",
            PhiCategory::FullNames => "full_names",
            PhiCategory::DatesOfBirth => "dates_of_birth",
            PhiCategory::StreetAddresses => "street_addresses",
        }
    }
}

impl fmt::Display for PhiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One matched cell. The preview is masked and never carries the full value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhiEvidence {
    pub column: String,
    pub row: usize,
    pub preview: String,
}

pub type PhiMatches = BTreeMap<PhiCategory, Vec<PhiEvidence>>;

/// Which cells a pattern applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    AnyText,
    NameLike,
}

const PHI_PATTERNS: &[(PhiCategory, Scope, &str)] = &[
    (
        PhiCategory::EmailAddresses,
        Scope::AnyText,
        r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
    ),
    (
        PhiCategory::PhoneNumbers,
        Scope::AnyText,
        r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b",
    ),
    (
        PhiCategory::GovernmentIds,
        Scope::AnyText,
        r"\b\d{3}-\d{2}-\d{4}\b|(?i)\bMRN[:#\s]*\d{6,10}\b",
    ),
    (
        PhiCategory::StreetAddresses,
        Scope::AnyText,
        r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+){1,3}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way|Place|Pl)\b",
    ),
    (
        PhiCategory::DatesOfBirth,
        Scope::AnyText,
        r"(?i)\b(?:DOB|D\.O\.B\.|date of birth|born)[:\s]+\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}",
    ),
    (
        PhiCategory::FullNames,
        Scope::AnyText,
        r"(?:\b(?:Patient|Name):\s*|\b(?:Dr|Mr|Mrs|Ms)\.?\s+)[A-Z][a-z]+(?:\s+[A-Z]\.)?\s+[A-Z][a-z]+",
    ),
    (
        PhiCategory::FullNames,
        Scope::NameLike,
        r"^(?:(?:Dr|Mr|Mrs|Ms)\.?\s+)?[A-Z][a-z]+(?:\s+[A-Z]\.)?\s+[A-Z][a-z]+(?:-[A-Z][a-z]+)?$",
    ),
];

fn name_hint(column: &str) -> bool {
    let lowered = column.to_ascii_lowercase();
    lowered.contains("name") && !lowered.contains("site") && !lowered.contains("study")
}

fn birth_hint(column: &str) -> bool {
    let lowered = column.to_ascii_lowercase();
    lowered == "dob" || lowered.contains("birth")
}

/// Column names that announce a direct identifier regardless of content.
pub fn is_phi_column_name(column: &str) -> bool {
    let lowered = column.to_ascii_lowercase();
    name_hint(column)
        || birth_hint(column)
        || ["email", "e_mail", "phone", "mobile", "address", "street", "ssn", "mrn"]
            .iter()
            .any(|hint| lowered.contains(hint))
}

fn mask(text: &str) -> String {
    let visible: String = text.chars().take(2).collect();
    format!("{visible}***")
}

pub struct PhiDetector {
    patterns: Vec<(PhiCategory, Scope, Regex)>,
    indirect_identifiers: Vec<String>,
}

impl Default for PhiDetector {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PhiDetector {
    /// `indirect_identifiers` are columns such as subject ids that are never scanned.
    pub fn new(indirect_identifiers: Vec<String>) -> Self {
        let patterns = PHI_PATTERNS
            .iter()
            .filter_map(|(category, scope, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((*category, *scope, re)),
                Err(e) => {
                    tracing::warn!("Invalid PHI pattern for {}: {}", category, e);
                    None
                }
            })
            .collect();
        Self {
            patterns,
            indirect_identifiers,
        }
    }

    /// Every column is scanned except configured indirect identifiers and `extra_skip` matches.
    /// A `phi_sensitive` descriptor overrides both.
    fn scanned(&self, col: &ColumnDescriptor, extra_skip: &dyn Fn(&str) -> bool) -> bool {
        col.phi_sensitive
            || !(extra_skip(&col.name) || self.indirect_identifiers.iter().any(|c| c == &col.name))
    }

    /// Scan string cells for direct identifiers. Categories without matches are absent.
    pub fn detect_phi(&self, dataset: &Dataset) -> PhiMatches {
        self.detect_phi_excluding(dataset, &|_| false)
    }

    /// Names of columns that must never leave the dataset: those with a PHI match in any
    /// cell plus those whose name announces one. `key_columns` are not scanned.
    pub fn phi_columns(&self, dataset: &Dataset, key_columns: &[&str]) -> BTreeSet<String> {
        let matches = self.detect_phi_excluding(dataset, &|name| key_columns.iter().any(|k| *k == name));
        let mut columns: BTreeSet<String> = matches
            .values()
            .flatten()
            .map(|e| e.column.clone())
            .collect();
        columns.extend(
            dataset
                .columns()
                .iter()
                .filter(|c| !key_columns.iter().any(|k| *k == c.name))
                .filter(|c| c.phi_sensitive || is_phi_column_name(&c.name))
                .map(|c| c.name.clone()),
        );
        columns
    }

    fn detect_phi_excluding(&self, dataset: &Dataset, skip: &dyn Fn(&str) -> bool) -> PhiMatches {
        let mut matches = PhiMatches::new();

        for (col_idx, col) in dataset.columns().iter().enumerate() {
            if !self.scanned(col, skip) {
                continue;
            }
            let name_like = name_hint(&col.name);
            let birth_like = birth_hint(&col.name);

            for (row_idx, value) in dataset.column_values(col_idx).enumerate() {
                let Some(text) = as_text(value) else {
                    continue;
                };
                let mut record = |category: PhiCategory| {
                    let hits = matches.entry(category).or_default();
                    if !hits.iter().any(|h| h.row == row_idx && h.column == col.name) {
                        hits.push(PhiEvidence {
                            column: col.name.clone(),
                            row: row_idx,
                            preview: mask(text),
                        });
                    }
                };

                for (category, scope, re) in &self.patterns {
                    let applies = match scope {
                        Scope::AnyText => true,
                        Scope::NameLike => name_like,
                    };
                    if applies && re.is_match(text.trim()) {
                        record(*category);
                    }
                }
                if birth_like && as_date(value).is_some() {
                    record(PhiCategory::DatesOfBirth);
                }
            }
        }

        matches
    }
}

impl Validator for PhiDetector {
    fn name(&self) -> &'static str {
        "phi_detector"
    }

    fn category(&self) -> FindingCategory {
        FindingCategory::Phi
    }

    fn check(&self, dataset: &Dataset, ctx: &CheckContext<'_>) -> CheckOutcome {
        let matches = self.detect_phi_excluding(dataset, &|name| ctx.is_key_column(name));
        let mut outcome = CheckOutcome::new(self.name(), self.category());

        let mut flagged_rows = std::collections::BTreeSet::new();
        for (category, evidence) in &matches {
            let mut columns: Vec<&str> = evidence.iter().map(|e| e.column.as_str()).collect();
            columns.dedup();
            for column in columns {
                let rows: Vec<usize> = evidence
                    .iter()
                    .filter(|e| e.column == column)
                    .map(|e| e.row)
                    .collect();
                flagged_rows.extend(rows.iter().copied());
                outcome.findings.push(
                    ValidationFinding::new(
                        FindingCategory::Phi,
                        Severity::Critical,
                        format!("{} match(es) for {} in column '{}'", rows.len(), category, column),
                    )
                    .in_column(column)
                    .at_rows(rows),
                );
            }
        }

        if !matches.is_empty() {
            outcome.passed = false;
            // Any direct identifier is disqualifying; the score only distinguishes extent.
            let fraction = flagged_rows.len() as f64 / dataset.n_rows().max(1) as f64;
            outcome.score = (0.5 * (1.0 - fraction)).clamp(0.0, 0.5);
        }

        let summary: BTreeMap<String, usize> = matches
            .iter()
            .map(|(c, e)| (c.as_str().to_string(), e.len()))
            .collect();
        outcome.with_details(&summary)
    }
}
