//! Sensitivity variant construction.
//!
//! Outlier flags never remove rows on their own. A declared
//! [`SensitivityRule`] decides which languages leave the sensitivity
//! variant; flagged languages the rule keeps are logged.

use crate::data::{Dataset, Variant};
use crate::error::{LcError, Result};
use crate::influence::InfluenceTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Which languages the sensitivity variant excludes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SensitivityRule {
    /// A fixed list of languages.
    Explicit { languages: Vec<String> },
    /// The `k` languages with the largest Cook's distance in any table.
    TopInfluential { k: usize },
    /// Every language flagged in at least one table.
    AllFlagged,
}

impl Default for SensitivityRule {
    fn default() -> Self {
        SensitivityRule::Explicit {
            languages: vec!["Limbu".to_string()],
        }
    }
}

impl std::fmt::Display for SensitivityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensitivityRule::Explicit { languages } => write!(f, "explicit [{}]", languages.join(", ")),
            SensitivityRule::TopInfluential { k } => write!(f, "top {} influential", k),
            SensitivityRule::AllFlagged => write!(f, "all flagged"),
        }
    }
}

/// The sensitivity variant and how it was chosen.
#[derive(Debug, Clone)]
pub struct SensitivityOutcome {
    /// Base rows minus `excluded`, with no derived columns.
    pub dataset: Dataset,
    /// Resolved exclusion list, sorted.
    pub excluded: Vec<String>,
    /// Languages flagged by some table but kept by the rule, sorted.
    pub flagged_kept: Vec<String>,
}

impl SensitivityRule {
    /// Resolve the rule to a sorted exclusion list.
    pub fn resolve(&self, tables: &[InfluenceTable]) -> Result<Vec<String>> {
        let excluded: BTreeSet<String> = match self {
            SensitivityRule::Explicit { languages } => languages.iter().cloned().collect(),
            SensitivityRule::TopInfluential { k } => {
                if *k == 0 {
                    return Err(LcError::InvalidParameter(
                        "top_influential needs k > 0".to_string(),
                    ));
                }
                let mut best: BTreeMap<&str, f64> = BTreeMap::new();
                for row in tables.iter().flat_map(|t| &t.rows) {
                    if row.cooks_distance.is_nan() {
                        continue;
                    }
                    let entry = best.entry(row.language.as_str()).or_insert(f64::NEG_INFINITY);
                    *entry = entry.max(row.cooks_distance);
                }
                let mut ranked: Vec<(&str, f64)> = best.into_iter().collect();
                ranked.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                ranked.into_iter().take(*k).map(|(l, _)| l.to_string()).collect()
            }
            SensitivityRule::AllFlagged => flagged_languages(tables),
        };
        Ok(excluded.into_iter().collect())
    }
}

fn flagged_languages(tables: &[InfluenceTable]) -> BTreeSet<String> {
    tables
        .iter()
        .flat_map(|t| t.rows.iter().filter(|r| r.flagged))
        .map(|r| r.language.clone())
        .collect()
}

/// Build the sensitivity variant from the cleaned base dataset.
///
/// `tables` are the influence tables computed on the base variant. The
/// returned dataset carries no derived columns; features must be derived
/// again on the remaining rows.
pub fn build_sensitivity_variant(
    base: &Dataset,
    rule: &SensitivityRule,
    tables: &[InfluenceTable],
) -> Result<SensitivityOutcome> {
    let excluded = rule.resolve(tables)?;
    if excluded.is_empty() {
        warn!(rule = %rule, "sensitivity rule excludes no languages");
    }

    let dataset = base.exclude_languages(
        &excluded,
        Variant::Sensitivity {
            excluded: excluded.clone(),
        },
    )?;

    let flagged_kept: Vec<String> = flagged_languages(tables)
        .into_iter()
        .filter(|l| !excluded.contains(l))
        .collect();
    for language in &flagged_kept {
        let models: Vec<&str> = tables
            .iter()
            .filter(|t| t.rows.iter().any(|r| r.flagged && &r.language == language))
            .map(|t| t.spec_name.as_str())
            .collect();
        warn!(language = %language, models = ?models, "influential language kept in sensitivity variant");
    }

    info!(
        rule = %rule,
        excluded = ?excluded,
        n = dataset.n_rows(),
        flagged_kept = flagged_kept.len(),
        "sensitivity variant built"
    );
    Ok(SensitivityOutcome {
        dataset,
        excluded,
        flagged_kept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::influence::InfluenceMethod;
    use crate::model::test_support;

    fn table(name: &str, scores: &[(&str, f64)]) -> InfluenceTable {
        InfluenceTable::new(
            name,
            Variant::Full,
            InfluenceMethod::FixedVariance,
            scores.iter().map(|(l, s)| (l.to_string(), *s)).collect(),
        )
    }

    fn tables() -> Vec<InfluenceTable> {
        // n = 4, threshold 1.0
        vec![
            table("a", &[("Limbu", 2.0), ("Newar", 0.1), ("Sherpa", 1.5), ("Magar", 0.2)]),
            table("b", &[("Limbu", 0.3), ("Newar", 0.9), ("Sherpa", 0.4), ("Magar", 1.2)]),
        ]
    }

    #[test]
    fn test_default_rule_drops_limbu() {
        let base = test_support::languages();
        let out = build_sensitivity_variant(&base, &SensitivityRule::default(), &tables()).unwrap();
        assert_eq!(out.excluded, vec!["Limbu"]);
        assert_eq!(out.dataset.n_rows(), base.n_rows() - 1);
        assert!(!out.dataset.languages().contains(&"Limbu".to_string()));
        assert_eq!(out.flagged_kept, vec!["Magar", "Sherpa"]);
        assert_eq!(
            out.dataset.variant(),
            &Variant::Sensitivity { excluded: vec!["Limbu".into()] }
        );
    }

    #[test]
    fn test_all_flagged() {
        let base = test_support::languages();
        let out = build_sensitivity_variant(&base, &SensitivityRule::AllFlagged, &tables()).unwrap();
        assert_eq!(out.excluded, vec!["Limbu", "Magar", "Sherpa"]);
        assert!(out.flagged_kept.is_empty());
    }

    #[test]
    fn test_top_influential_uses_max_score() {
        let rule = SensitivityRule::TopInfluential { k: 2 };
        assert_eq!(rule.resolve(&tables()).unwrap(), vec!["Limbu", "Sherpa"]);
        assert!(SensitivityRule::TopInfluential { k: 0 }.resolve(&tables()).is_err());
    }

    #[test]
    fn test_unknown_language_rejected() {
        let base = test_support::languages();
        let rule = SensitivityRule::Explicit { languages: vec!["Klingon".into()] };
        assert!(build_sensitivity_variant(&base, &rule, &[]).is_err());
    }

    #[test]
    fn test_rule_yaml() {
        let rule: SensitivityRule = serde_yaml::from_str("rule: top_influential\nk: 3").unwrap();
        assert_eq!(rule, SensitivityRule::TopInfluential { k: 3 });
        let rule: SensitivityRule =
            serde_yaml::from_str("rule: explicit\nlanguages: [Limbu, Newar]").unwrap();
        assert_eq!(
            rule,
            SensitivityRule::Explicit { languages: vec!["Limbu".into(), "Newar".into()] }
        );
    }
}
