//! Formula parsing for model specification.

use crate::error::{LcError, Result};
use serde::{Deserialize, Serialize};

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Intercept term (constant).
    Intercept,
    /// Main effect of a variable.
    Main(String),
}

impl Term {
    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Intercept => vec![],
            Term::Main(v) => vec![v.as_str()],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Intercept => write!(f, "1"),
            Term::Main(v) => write!(f, "{}", v),
        }
    }
}

/// A parsed fixed-effects formula.
///
/// Supports R-style syntax with an optional response:
/// - `~ x` - intercept + x
/// - `y ~ x + z` - response y, intercept + x + z
/// - `y ~ 0 + x` - no intercept
/// - `y ~ 1` - intercept only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Response variable, if given on the left-hand side.
    pub response: Option<String>,
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula (excluding intercept).
    pub terms: Vec<Term>,
    /// Original formula string.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use lingcomplex::data::Formula;
    /// let f = Formula::parse("scaled_cell_complexity ~ scaled_altitude").unwrap();
    /// assert_eq!(f.response.as_deref(), Some("scaled_cell_complexity"));
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 1);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (response, rhs) = split_response(formula)?;

        if rhs.is_empty() {
            return Err(LcError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let (intercept, rhs) = if rhs == "0" || rhs == "-1" {
            return Err(LcError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        } else if rhs.starts_with("0 +") || rhs.starts_with("0+") {
            (false, rhs.trim_start_matches('0').trim_start_matches(|c: char| c == '+' || c.is_whitespace()))
        } else if rhs.starts_with("-1 +") || rhs.starts_with("-1+") {
            (false, rhs.trim_start_matches("-1").trim_start_matches(|c: char| c == '+' || c.is_whitespace()))
        } else {
            (true, rhs)
        };

        let mut terms = Vec::new();
        for term_str in rhs.split('+').map(|s| s.trim()) {
            if term_str.is_empty() || term_str == "1" {
                continue;
            }
            if term_str.contains(['*', ':', '(', ')', '|']) {
                return Err(LcError::FormulaParse(format!(
                    "Unsupported term '{}': only main effects are allowed",
                    term_str
                )));
            }
            let term = Term::Main(term_str.to_string());
            if !terms.contains(&term) {
                terms.push(term);
            }
        }

        if terms.is_empty() && !intercept {
            return Err(LcError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            response,
            intercept,
            terms,
            formula_str,
        })
    }

    /// Get all predictor names used in the formula.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Check if a variable is used in the formula.
    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(resp) = &self.response {
            write!(f, "{} ", resp)?;
        }
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let term_strs: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", term_strs.join(" + "))
    }
}

/// Split `lhs ~ rhs`, returning the optional response and the trimmed rhs.
pub(crate) fn split_response(formula: &str) -> Result<(Option<String>, &str)> {
    let formula = formula.trim();
    let tilde = formula
        .find('~')
        .ok_or_else(|| LcError::FormulaParse("Formula must contain '~'".to_string()))?;
    let lhs = formula[..tilde].trim();
    let rhs = formula[tilde + 1..].trim();
    if rhs.contains('~') {
        return Err(LcError::FormulaParse(
            "Formula must contain exactly one '~'".to_string(),
        ));
    }
    let response = if lhs.is_empty() {
        None
    } else if lhs.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(lhs.to_string())
    } else {
        return Err(LcError::FormulaParse(format!(
            "Response must be a single column name, got '{}'",
            lhs
        )));
    };
    Ok((response, rhs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let f = Formula::parse("~ hill_valley").unwrap();
        assert!(f.intercept);
        assert!(f.response.is_none());
        assert_eq!(f.terms, vec![Term::Main("hill_valley".to_string())]);
    }

    #[test]
    fn test_parse_with_response() {
        let f = Formula::parse("hill_binary ~ scaled_altitude + scaled_stdev_slope").unwrap();
        assert_eq!(f.response.as_deref(), Some("hill_binary"));
        assert_eq!(f.terms.len(), 2);
        assert_eq!(f.variables(), vec!["scaled_altitude", "scaled_stdev_slope"]);
    }

    #[test]
    fn test_parse_no_intercept() {
        let f = Formula::parse("y ~ 0 + x").unwrap();
        assert!(!f.intercept);
        assert_eq!(f.terms.len(), 1);
    }

    #[test]
    fn test_display_roundtrip() {
        let f = Formula::parse("y ~ a + b").unwrap();
        assert_eq!(f.to_string(), "y ~ a + b");
        let g = Formula::parse(&f.to_string()).unwrap();
        assert_eq!(g.terms, f.terms);
    }

    #[test]
    fn test_invalid_formula() {
        assert!(Formula::parse("y + x").is_err()); // missing ~
        assert!(Formula::parse("y ~").is_err()); // empty RHS
        assert!(Formula::parse("~ 0").is_err()); // no terms
        assert!(Formula::parse("y ~ a * b").is_err());
        assert!(Formula::parse("log(y) ~ a").is_err());
    }
}
