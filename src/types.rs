//! Core data types: the tabular dataset, column descriptors and validation findings.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PrepError, Result};

/// Semantic role of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Identifier,
    Numeric,
    Categorical,
    Temporal,
    FreeText,
}

/// Closed interval of plausible values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub valid_range: Option<ValueRange>,
    #[serde(default)]
    pub phi_sensitive: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            valid_range: None,
            phi_sensitive: false,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some(ValueRange::new(min, max));
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.phi_sensitive = true;
        self
    }
}

#[derive(Deserialize)]
struct RawDataset {
    columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = PrepError;

    fn try_from(raw: RawDataset) -> Result<Self> {
        Dataset::new(raw.columns, raw.rows)
    }
}

/// In-memory table of visit records. Rows are positional and always as wide as `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(PrepError::DataShape {
                    column: Some(col.name.clone()),
                    message: "duplicate column name".to_string(),
                });
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(PrepError::shape(format!(
                    "row {i} has {} cells, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build a dataset from bare column names, inferring each column's kind from its values.
    pub fn from_rows(names: &[&str], rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let values: Vec<&Value> = rows.iter().filter_map(|row| row.get(i)).collect();
            columns.push(ColumnDescriptor::new(*name, infer_column_kind(name, &values)));
        }
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Like [`Dataset::column_index`] but failing with a shape error naming the column.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        if name.trim().is_empty() {
            return Err(PrepError::configuration("required column name is empty"));
        }
        self.column_index(name)
            .ok_or_else(|| PrepError::missing_column(name))
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Numeric view of a column; missing or non-numeric cells are `None`.
    pub fn numeric_column(&self, idx: usize) -> Vec<Option<f64>> {
        self.column_values(idx).map(as_number).collect()
    }
}

/// Whether a cell counts as missing.
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let t = s.trim();
            t.is_empty()
                || ["na", "n/a", "nan", "null", "none"]
                    .iter()
                    .any(|m| t.eq_ignore_ascii_case(m))
        }
        Value::Number(n) => n.as_f64().is_some_and(|f| !f.is_finite()),
        _ => false,
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) if !is_missing(value) => {
            s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

pub fn as_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !is_missing(value) => Some(s.as_str()),
        _ => None,
    }
}

/// Subject identifier as a string; integral floats render like integers, so `1.0` is `"1"`.
pub fn as_subject(value: &Value) -> Option<String> {
    match value {
        _ if is_missing(value) => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
                Some(format!("{}", f as i64))
            }
            _ => Some(n.to_string()),
        },
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn as_date(value: &Value) -> Option<NaiveDate> {
    as_text(value).and_then(|s| parse_date(s.trim()))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

/// Canonical string form of a cell, used for equality keys.
pub fn cell_key(value: &Value) -> String {
    if is_missing(value) {
        return "\u{0}null".to_string();
    }
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => format!("n:{f:?}"),
            None => format!("n:{n}"),
        },
        Value::String(s) => format!("s:{s}"),
        other => format!("j:{other}"),
    }
}

/// Infer a column's kind from its name and a sample of values.
pub fn infer_column_kind(name: &str, values: &[&Value]) -> ColumnKind {
    let lowered = name.to_ascii_lowercase();
    if lowered == "id"
        || lowered.ends_with("_id")
        || ["rid", "ptid", "subject", "patient", "mrn"].contains(&lowered.as_str())
    {
        return ColumnKind::Identifier;
    }

    let present: Vec<&Value> = values.iter().copied().filter(|v| !is_missing(v)).collect();
    if present.is_empty() {
        return ColumnKind::Numeric;
    }
    if present.iter().all(|v| as_number(v).is_some()) {
        return ColumnKind::Numeric;
    }
    if present.iter().all(|v| as_date(v).is_some()) {
        return ColumnKind::Temporal;
    }

    let distinct: HashSet<String> = present.iter().map(|v| cell_key(v)).collect();
    if distinct.len() <= 20 || distinct.len() * 2 <= present.len() {
        ColumnKind::Categorical
    } else {
        ColumnKind::FreeText
    }
}

/// Quality axis a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Phi,
    Completeness,
    Outlier,
    Range,
    Duplicate,
    Temporal,
}

impl FindingCategory {
    pub const ALL: [FindingCategory; 6] = [
        FindingCategory::Phi,
        FindingCategory::Completeness,
        FindingCategory::Outlier,
        FindingCategory::Range,
        FindingCategory::Duplicate,
        FindingCategory::Temporal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Phi => "phi",
            FindingCategory::Completeness => "completeness",
            FindingCategory::Outlier => "outlier",
            FindingCategory::Range => "range",
            FindingCategory::Duplicate => "duplicate",
            FindingCategory::Temporal => "temporal",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single quality observation. Findings are data, never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub category: FindingCategory,
    pub severity: Severity,
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<usize>,
    pub message: String,
}

impl ValidationFinding {
    pub fn new(category: FindingCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            column: None,
            rows: Vec::new(),
            message: message.into(),
        }
    }

    pub fn in_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn at_rows(mut self, rows: Vec<usize>) -> Self {
        self.rows = rows;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_markers() {
        assert!(is_missing(&Value::Null));
        assert!(is_missing(&json!("  ")));
        assert!(is_missing(&json!("NA")));
        assert!(is_missing(&json!("nan")));
        assert!(!is_missing(&json!(0)));
        assert!(!is_missing(&json!("0")));
    }

    #[test]
    fn test_numeric_strings_parse() {
        assert_eq!(as_number(&json!("27.5")), Some(27.5));
        assert_eq!(as_number(&json!(3)), Some(3.0));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!("NA")), None);
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 14).unwrap();
        assert_eq!(parse_date("2020-03-14"), Some(expected));
        assert_eq!(parse_date("2020-03-14 08:30:00"), Some(expected));
        assert_eq!(parse_date("2020-03-14T08:30:00Z"), Some(expected));
        assert_eq!(parse_date("03/14/2020"), Some(expected));
        assert_eq!(parse_date("March 14"), None);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let cols = vec![
            ColumnDescriptor::new("a", ColumnKind::Numeric),
            ColumnDescriptor::new("b", ColumnKind::Numeric),
        ];
        let err = Dataset::new(cols, vec![vec![json!(1)]]).unwrap_err();
        assert!(matches!(err, PrepError::DataShape { .. }));
    }

    #[test]
    fn test_infer_kinds() {
        let ds = Dataset::from_rows(
            &["subject_id", "visit_date", "mmse", "dx"],
            vec![
                vec![json!("S1"), json!("2020-01-01"), json!(28), json!("CN")],
                vec![json!("S1"), json!("2021-01-01"), json!(27), json!("MCI")],
            ],
        )
        .unwrap();
        let kinds: Vec<ColumnKind> = ds.columns().iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Identifier,
                ColumnKind::Temporal,
                ColumnKind::Numeric,
                ColumnKind::Categorical
            ]
        );
    }

    #[test]
    fn test_deserialize_checks_shape() {
        let raw = r#"{"columns":[{"name":"a","kind":"numeric"}],"rows":[[1],[2,3]]}"#;
        assert!(serde_json::from_str::<Dataset>(raw).is_err());

        let ok = r#"{"columns":[{"name":"a","kind":"numeric"}],"rows":[[1],[2]]}"#;
        let ds: Dataset = serde_json::from_str(ok).unwrap();
        assert_eq!(ds.n_rows(), 2);
    }

    #[test]
    fn test_numeric_subject_ids_agree() {
        assert_eq!(as_subject(&json!(1.0)), Some("1".to_string()));
        assert_eq!(as_subject(&json!(1)), as_subject(&json!(1.0)));
        assert_eq!(as_subject(&json!(-42.0)), Some("-42".to_string()));
        assert_eq!(as_subject(&json!(2.5)), Some("2.5".to_string()));
        assert_eq!(as_subject(&json!(" S7 ")), Some("S7".to_string()));
    }

    #[test]
    fn test_cell_key_treats_int_and_float_alike() {
        assert_eq!(cell_key(&json!(1)), cell_key(&json!(1.0)));
        assert_ne!(cell_key(&json!(1)), cell_key(&json!("1")));
    }
}
