//! Static name-pattern registry grouping features for reporting.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::range::normalize_column_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Demographic,
    Cognitive,
    Biomarker,
    Imaging,
    Genetic,
    Lifestyle,
    Temporal,
    Derived,
}

impl FeatureCategory {
    pub const ALL: [FeatureCategory; 8] = [
        FeatureCategory::Demographic,
        FeatureCategory::Cognitive,
        FeatureCategory::Biomarker,
        FeatureCategory::Imaging,
        FeatureCategory::Genetic,
        FeatureCategory::Lifestyle,
        FeatureCategory::Temporal,
        FeatureCategory::Derived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureCategory::Demographic => "demographic",
            FeatureCategory::Cognitive => "cognitive",
            FeatureCategory::Biomarker => "biomarker",
            FeatureCategory::Imaging => "imaging",
            FeatureCategory::Genetic => "genetic",
            FeatureCategory::Lifestyle => "lifestyle",
            FeatureCategory::Temporal => "temporal",
            FeatureCategory::Derived => "derived",
        }
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; the first category with a matching pattern wins.
/// Patterns containing `_` must appear in the normalized name; others must prefix a token.
const CATEGORY_PATTERNS: &[(FeatureCategory, &[&str])] = &[
    (
        FeatureCategory::Temporal,
        &["visit_index", "days_since", "rate_of_change", "visit"],
    ),
    (FeatureCategory::Genetic, &["apoe", "genotype", "snp", "allele", "prs"]),
    (
        FeatureCategory::Cognitive,
        &["mmse", "moca", "cdr", "adas", "faq", "gds", "npi", "ravlt", "trail", "digit", "memory", "cognit"],
    ),
    (
        FeatureCategory::Imaging,
        &["hippocamp", "ventric", "cortical", "entorhinal", "fusiform", "wholebrain", "icv", "mri", "pet", "fdg", "av45", "suvr", "volume"],
    ),
    (
        FeatureCategory::Biomarker,
        &["abeta", "amyloid", "tau", "ptau", "nfl", "csf", "plasma", "hba1c", "glucose", "cholesterol", "crp"],
    ),
    (
        FeatureCategory::Demographic,
        &["age", "sex", "gender", "educ", "race", "ethnic", "marital", "handed"],
    ),
    (
        FeatureCategory::Lifestyle,
        &["bmi", "smok", "alcohol", "exercise", "physical", "diet", "sleep", "bp", "systolic", "diastolic", "heart_rate"],
    ),
];

pub fn categorize_feature(name: &str) -> FeatureCategory {
    let normalized = normalize_column_name(name);
    let tokens: Vec<&str> = normalized.split('_').collect();

    for (category, patterns) in CATEGORY_PATTERNS {
        let hit = patterns.iter().any(|p| {
            if p.contains('_') {
                normalized.contains(p)
            } else {
                tokens.iter().any(|t| t.starts_with(p))
            }
        });
        if hit {
            return *category;
        }
    }
    FeatureCategory::Derived
}

/// Every category is present in the result, possibly with no features.
pub fn categorize_features<S: AsRef<str>>(names: &[S]) -> BTreeMap<FeatureCategory, Vec<String>> {
    let mut grouped: BTreeMap<FeatureCategory, Vec<String>> =
        FeatureCategory::ALL.iter().map(|c| (*c, Vec::new())).collect();
    for name in names {
        grouped
            .entry(categorize_feature(name.as_ref()))
            .or_default()
            .push(name.as_ref().to_string());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_feature_names() {
        assert_eq!(categorize_feature("MMSE_score"), FeatureCategory::Cognitive);
        assert_eq!(categorize_feature("mmse_score_rate_of_change"), FeatureCategory::Temporal);
        assert_eq!(categorize_feature("days_since_baseline"), FeatureCategory::Temporal);
        assert_eq!(categorize_feature("APOE4"), FeatureCategory::Genetic);
        assert_eq!(categorize_feature("Hippocampus"), FeatureCategory::Imaging);
        assert_eq!(categorize_feature("csf_ptau"), FeatureCategory::Biomarker);
        assert_eq!(categorize_feature("age"), FeatureCategory::Demographic);
        assert_eq!(categorize_feature("education_years"), FeatureCategory::Demographic);
        assert_eq!(categorize_feature("BMI"), FeatureCategory::Lifestyle);
        assert_eq!(categorize_feature("site_code"), FeatureCategory::Derived);
    }

    #[test]
    fn test_token_prefix_not_substring() {
        // "page" must not match the "age" pattern.
        assert_eq!(categorize_feature("page_count"), FeatureCategory::Derived);
    }

    #[test]
    fn test_grouping_keeps_empty_categories() {
        let grouped = categorize_features(&["age", "mmse"]);
        assert_eq!(grouped.len(), FeatureCategory::ALL.len());
        assert_eq!(grouped[&FeatureCategory::Demographic], vec!["age"]);
        assert!(grouped[&FeatureCategory::Imaging].is_empty());
    }
}
