//! Declarative model specifications.

use crate::data::{Formula, MixedFormula, Variant};
use crate::error::{LcError, Result};
use serde::{Deserialize, Serialize};

/// Model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    /// Gaussian linear mixed model with one random intercept, fit by REML.
    Lmm,
    /// Binomial GLM with logit link, no random effects.
    BinomialGlm,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Lmm => write!(f, "lmm"),
            Family::BinomialGlm => write!(f, "binomial"),
        }
    }
}

impl std::str::FromStr for Family {
    type Err = LcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lmm" | "lmer" | "gaussian" => Ok(Family::Lmm),
            "binomial" | "glm" | "logistic" => Ok(Family::BinomialGlm),
            other => Err(LcError::InvalidParameter(format!(
                "Unknown model family '{}' (expected 'lmm' or 'binomial')",
                other
            ))),
        }
    }
}

/// Which dataset variants a specification is declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariantSelector {
    Full,
    Sensitivity,
    Both,
}

impl VariantSelector {
    /// Whether a dataset of this variant should be fit with the spec.
    ///
    /// Leave-one-out variants are driven explicitly by the sweep and always match.
    pub fn matches(&self, variant: &Variant) -> bool {
        match (self, variant) {
            (_, Variant::LeaveOneOut { .. }) => true,
            (VariantSelector::Both, _) => true,
            (VariantSelector::Full, Variant::Full) => true,
            (VariantSelector::Sensitivity, Variant::Sensitivity { .. }) => true,
            _ => false,
        }
    }
}

/// One entry of the model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Unique name, e.g. `case_marking_complexity~L2`.
    pub name: String,
    pub family: Family,
    /// Response column.
    pub response: String,
    /// Fixed-effect predictors (main effects only).
    pub predictors: Vec<String>,
    /// Grouping column for the random intercept.
    pub random_intercept: Option<String>,
    /// Coefficient reported by sweeps and summaries. Either an exact
    /// coefficient name or a predictor name, in which case the first
    /// non-reference coefficient of that predictor is used.
    pub focal_coefficient: String,
    pub variant: VariantSelector,
}

impl ModelSpec {
    /// LMM with a random intercept for `group`.
    pub fn lmm(name: &str, response: &str, predictors: &[&str], group: &str) -> Self {
        Self {
            name: name.to_string(),
            family: Family::Lmm,
            response: response.to_string(),
            predictors: predictors.iter().map(|s| s.to_string()).collect(),
            random_intercept: Some(group.to_string()),
            focal_coefficient: predictors.first().map(|s| s.to_string()).unwrap_or_default(),
            variant: VariantSelector::Both,
        }
    }

    /// Logistic GLM without random effects.
    pub fn glm(name: &str, response: &str, predictors: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            family: Family::BinomialGlm,
            response: response.to_string(),
            predictors: predictors.iter().map(|s| s.to_string()).collect(),
            random_intercept: None,
            focal_coefficient: predictors.first().map(|s| s.to_string()).unwrap_or_default(),
            variant: VariantSelector::Both,
        }
    }

    /// Set the focal coefficient.
    pub fn with_focal(mut self, coefficient: &str) -> Self {
        self.focal_coefficient = coefficient.to_string();
        self
    }

    /// Restrict the variants this spec is declared for.
    pub fn with_variant(mut self, variant: VariantSelector) -> Self {
        self.variant = variant;
        self
    }

    /// Build a spec from lme4-style formula text.
    ///
    /// # Examples
    /// ```
    /// use lingcomplex::model::{Family, ModelSpec};
    /// let spec = ModelSpec::parse(
    ///     "case~L2",
    ///     "scaled_case_marking_complexity ~ L2 + (1 | subfamily)",
    ///     Family::Lmm,
    ///     None,
    /// )
    /// .unwrap();
    /// assert_eq!(spec.random_intercept.as_deref(), Some("subfamily"));
    /// assert_eq!(spec.focal_coefficient, "L2");
    /// ```
    pub fn parse(name: &str, formula: &str, family: Family, focal: Option<&str>) -> Result<Self> {
        let mixed = MixedFormula::parse(formula)?;
        let response = mixed.fixed.response.clone().ok_or_else(|| {
            LcError::FormulaParse(format!("Formula '{}' has no response", formula))
        })?;
        if !mixed.fixed.intercept {
            return Err(LcError::FormulaParse(
                "Models without an intercept are not supported".to_string(),
            ));
        }
        let predictors: Vec<String> = mixed
            .fixed
            .terms
            .iter()
            .flat_map(|t| t.variables())
            .map(String::from)
            .collect();
        let random_intercept = mixed.random.map(|r| r.grouping);

        match (family, &random_intercept) {
            (Family::Lmm, None) => {
                return Err(LcError::FormulaParse(
                    "An LMM needs a random intercept term such as (1 | subfamily)".to_string(),
                ))
            }
            (Family::BinomialGlm, Some(_)) => {
                return Err(LcError::FormulaParse(
                    "Binomial models do not take random effects".to_string(),
                ))
            }
            _ => {}
        }

        let focal_coefficient = match focal {
            Some(f) => f.to_string(),
            None => predictors.first().cloned().unwrap_or_else(|| "(Intercept)".to_string()),
        };

        Ok(Self {
            name: name.to_string(),
            family,
            response,
            predictors,
            random_intercept,
            focal_coefficient,
            variant: VariantSelector::Both,
        })
    }

    /// Formula text, lme4 style.
    pub fn formula(&self) -> String {
        let rhs = if self.predictors.is_empty() {
            "1".to_string()
        } else {
            self.predictors.join(" + ")
        };
        match &self.random_intercept {
            Some(g) => format!("{} ~ {} + (1 | {})", self.response, rhs, g),
            None => format!("{} ~ {}", self.response, rhs),
        }
    }

    /// The fixed-effects part as a parsed formula.
    pub fn fixed_formula(&self) -> Result<Formula> {
        let rhs = if self.predictors.is_empty() {
            "1".to_string()
        } else {
            self.predictors.join(" + ")
        };
        Formula::parse(&format!("{} ~ {}", self.response, rhs))
    }

    /// Every column the model reads.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = std::iter::once(self.response.as_str())
            .chain(self.predictors.iter().map(|s| s.as_str()))
            .chain(self.random_intercept.iter().map(|s| s.as_str()))
            .collect();
        cols.dedup();
        cols
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.name, self.family, self.formula())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_roundtrip() {
        let spec = ModelSpec::lmm("m", "scaled_form_complexity", &["hill_valley"], "subfamily");
        assert_eq!(spec.formula(), "scaled_form_complexity ~ hill_valley + (1 | subfamily)");
        let back = ModelSpec::parse("m", &spec.formula(), Family::Lmm, None).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_glm_formula() {
        let spec = ModelSpec::glm("g", "hill_binary", &["scaled_altitude", "scaled_stdev_slope"]);
        assert_eq!(spec.formula(), "hill_binary ~ scaled_altitude + scaled_stdev_slope");
        assert_eq!(spec.columns(), vec!["hill_binary", "scaled_altitude", "scaled_stdev_slope"]);
    }

    #[test]
    fn test_parse_family_mismatch() {
        assert!(ModelSpec::parse("x", "y ~ a", Family::Lmm, None).is_err());
        assert!(ModelSpec::parse("x", "y ~ a + (1 | g)", Family::BinomialGlm, None).is_err());
        assert!(ModelSpec::parse("x", "~ a + (1 | g)", Family::Lmm, None).is_err());
    }

    #[test]
    fn test_variant_selector() {
        let sens = Variant::Sensitivity { excluded: vec!["Limbu".into()] };
        let loo = Variant::LeaveOneOut { dropped: "Limbu".into() };
        assert!(VariantSelector::Full.matches(&Variant::Full));
        assert!(!VariantSelector::Full.matches(&sens));
        assert!(VariantSelector::Sensitivity.matches(&sens));
        assert!(VariantSelector::Both.matches(&sens));
        assert!(VariantSelector::Full.matches(&loo));
    }

    #[test]
    fn test_family_from_str() {
        assert_eq!("LMM".parse::<Family>().unwrap(), Family::Lmm);
        assert_eq!("binomial".parse::<Family>().unwrap(), Family::BinomialGlm);
        assert!("poisson".parse::<Family>().is_err());
    }
}
