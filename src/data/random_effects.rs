//! Random effects specification for mixed models.
//!
//! Supports lme4-style random intercepts:
//! - `(1 | subfamily)` - random intercept per subfamily

use crate::data::{split_response, Dataset, Formula};
use crate::error::{LcError, Result};
use nalgebra::DMatrix;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A random-intercept term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Grouping variable (e.g., "subfamily").
    pub grouping: String,
}

impl RandomEffect {
    /// Random intercept for the given grouping column.
    pub fn intercept(grouping: &str) -> Self {
        Self {
            grouping: grouping.to_string(),
        }
    }

    /// Parse a random effect specification string such as `(1 | subfamily)`.
    ///
    /// Random slopes are rejected.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();

        if !spec.starts_with('(') || !spec.ends_with(')') {
            return Err(LcError::FormulaParse(format!(
                "Random effect must be wrapped in parentheses: {}",
                spec
            )));
        }

        let inner = spec[1..spec.len() - 1].trim();
        let parts: Vec<&str> = inner.split('|').collect();
        if parts.len() != 2 {
            return Err(LcError::FormulaParse(format!(
                "Random effect must have exactly one '|': {}",
                spec
            )));
        }

        let terms = parts[0].trim();
        let grouping = parts[1].trim().to_string();

        if grouping.is_empty() {
            return Err(LcError::FormulaParse(
                "Random effect grouping variable cannot be empty".to_string(),
            ));
        }
        if terms != "1" {
            return Err(LcError::FormulaParse(format!(
                "Only random intercepts '(1 | group)' are supported, got '{}'",
                spec
            )));
        }

        Ok(Self { grouping })
    }
}

impl std::fmt::Display for RandomEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(1 | {})", self.grouping)
    }
}

/// A formula with fixed effects and at most one random intercept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedFormula {
    /// Fixed effects formula, including the response.
    pub fixed: Formula,
    /// Random intercept, if any.
    pub random: Option<RandomEffect>,
    /// Original formula string.
    pub formula_str: String,
}

impl MixedFormula {
    /// Parse a mixed model formula.
    ///
    /// # Examples
    /// ```
    /// use lingcomplex::data::MixedFormula;
    /// let f = MixedFormula::parse("scaled_case_marking_complexity ~ L2 + (1 | subfamily)").unwrap();
    /// assert_eq!(f.fixed.response.as_deref(), Some("scaled_case_marking_complexity"));
    /// assert_eq!(f.random.unwrap().grouping, "subfamily");
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (response, rhs) = split_response(formula)?;

        if rhs.is_empty() {
            return Err(LcError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let re = Regex::new(r"\([^)]+\|[^)]+\)")
            .map_err(|e| LcError::FormulaParse(e.to_string()))?;
        let random_strs: Vec<&str> = re.find_iter(rhs).map(|m| m.as_str()).collect();
        if random_strs.len() > 1 {
            return Err(LcError::FormulaParse(
                "At most one random intercept is supported".to_string(),
            ));
        }
        let random = random_strs
            .first()
            .map(|s| RandomEffect::parse(s))
            .transpose()?;

        let mut fixed_str = rhs.to_string();
        for re_str in &random_strs {
            fixed_str = fixed_str.replace(re_str, "");
        }
        let fixed_str = fixed_str
            .split('+')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" + ");
        let fixed_rhs = if fixed_str.is_empty() { "1".to_string() } else { fixed_str };
        let fixed_formula_str = match &response {
            Some(r) => format!("{} ~ {}", r, fixed_rhs),
            None => format!("~ {}", fixed_rhs),
        };

        let fixed = Formula::parse(&fixed_formula_str)?;

        Ok(Self {
            fixed,
            random,
            formula_str,
        })
    }

    /// Check if the formula has a random intercept.
    pub fn has_random_effects(&self) -> bool {
        self.random.is_some()
    }
}

impl std::fmt::Display for MixedFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula_str)
    }
}

/// Design matrix for random intercepts (Z matrix).
#[derive(Debug, Clone)]
pub struct RandomDesignMatrix {
    /// The Z matrix (observations × groups).
    pub matrix: DMatrix<f64>,
    /// Group index for each observation.
    pub group_indices: Vec<usize>,
    /// Unique group IDs, in order of first appearance.
    pub group_ids: Vec<String>,
    /// Number of groups.
    pub n_groups: usize,
}

impl RandomDesignMatrix {
    /// Build the random-intercept design matrix for a grouping column.
    pub fn from_random_effect(dataset: &Dataset, random_effect: &RandomEffect) -> Result<Self> {
        let groups = dataset.categorical(&random_effect.grouping)?;
        Ok(Self::from_groups(&groups))
    }

    /// Build from per-observation group labels.
    pub fn from_groups(groups: &[String]) -> Self {
        let mut group_map: HashMap<&str, usize> = HashMap::new();
        let mut group_ids: Vec<String> = Vec::new();
        let mut group_indices: Vec<usize> = Vec::with_capacity(groups.len());

        for g in groups {
            let idx = *group_map.entry(g.as_str()).or_insert_with(|| {
                group_ids.push(g.clone());
                group_ids.len() - 1
            });
            group_indices.push(idx);
        }

        let n_groups = group_ids.len();
        let mut z = DMatrix::zeros(groups.len(), n_groups);
        for (i, &g) in group_indices.iter().enumerate() {
            z[(i, g)] = 1.0;
        }

        Self {
            matrix: z,
            group_indices,
            group_ids,
            n_groups,
        }
    }

    /// Number of observations.
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Get the Z matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Number of observations per group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups];
        for &idx in &self.group_indices {
            counts[idx] += 1;
        }
        counts
    }

    /// Number of groups with at least two observations.
    pub fn n_replicated_groups(&self) -> usize {
        self.observations_per_group().iter().filter(|&&c| c >= 2).count()
    }

    /// Copy without the given observation. Groups left empty are removed.
    pub fn without_row(&self, row: usize) -> Self {
        let groups: Vec<String> = self
            .group_indices
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != row)
            .map(|(_, &g)| self.group_ids[g].clone())
            .collect();
        Self::from_groups(&groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_random_intercept() {
        let re = RandomEffect::parse("(1 | subfamily)").unwrap();
        assert_eq!(re.grouping, "subfamily");
        assert_eq!(re.to_string(), "(1 | subfamily)");
    }

    #[test]
    fn test_parse_random_slope_rejected() {
        assert!(RandomEffect::parse("(1 + altitude | subfamily)").is_err());
        assert!(RandomEffect::parse("1 | subfamily").is_err());
        assert!(RandomEffect::parse("(1 | )").is_err());
    }

    #[test]
    fn test_mixed_formula() {
        let f = MixedFormula::parse("scaled_form_complexity ~ hill_valley + (1 | subfamily)").unwrap();
        assert!(f.has_random_effects());
        assert_eq!(f.fixed.terms.len(), 1);
        assert_eq!(f.fixed.response.as_deref(), Some("scaled_form_complexity"));
    }

    #[test]
    fn test_mixed_formula_fixed_only() {
        let f = MixedFormula::parse("hill_binary ~ scaled_altitude").unwrap();
        assert!(!f.has_random_effects());
    }

    #[test]
    fn test_mixed_formula_intercept_only_fixed() {
        let f = MixedFormula::parse("y ~ (1 | subfamily)").unwrap();
        assert!(f.fixed.intercept);
        assert!(f.fixed.terms.is_empty());
    }

    #[test]
    fn test_random_design_matrix() {
        let groups: Vec<String> = ["Kiranti", "Kiranti", "Newaric", "Tamangic", "Tamangic"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let z = RandomDesignMatrix::from_groups(&groups);
        assert_eq!(z.n_groups, 3);
        assert_eq!(z.observations_per_group(), vec![2, 1, 2]);
        assert_eq!(z.n_replicated_groups(), 2);
        assert_eq!(z.matrix()[(2, 1)], 1.0);

        let dropped = z.without_row(2);
        assert_eq!(dropped.n_groups, 2);
        assert_eq!(dropped.group_ids, vec!["Kiranti", "Tamangic"]);
    }
}
