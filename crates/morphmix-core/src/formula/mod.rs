//! Formula parsing for lmer-style mixed-model specifications.
//!
//! This module parses formulas like "log_beak ~ log_wing_c + (log_wing_c | taxon)"
//! into structured components for design matrix construction. The right-hand
//! side has plain fixed-effect terms plus exactly one parenthesized random
//! term `(re | group)`, where `re` is `1` (intercept only), a variable name
//! (intercept + that slope), or `1 + var` / `0 + var` spelled out.

use crate::error::{MorphMixError, Result};

/// The random term of a formula: which coefficients vary by group.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomTerm {
    /// Whether the intercept varies by group.
    pub intercept: bool,
    /// Variables whose slopes vary by group (at most one is supported).
    pub slopes: Vec<String>,
    /// The grouping variable, e.g. "taxon".
    pub group: String,
}

impl RandomTerm {
    /// Per-group dimension: 1 for intercept-only or slope-only, 2 for both.
    pub fn dimension(&self) -> usize {
        self.intercept as usize + self.slopes.len()
    }
}

/// Result of parsing a formula.
#[derive(Debug, Clone)]
pub struct ParsedFormula {
    pub response: String,
    pub fixed_effects: Vec<String>,
    pub has_intercept: bool,
    pub random: RandomTerm,
}

/// Split formula RHS by '+', respecting parentheses.
fn split_terms(rhs: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0;

    for c in rhs.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            '+' if depth == 0 => {
                let term = current.trim().to_string();
                if !term.is_empty() {
                    terms.push(term);
                }
                current = String::new();
            }
            _ => {
                current.push(c);
            }
        }
    }

    let term = current.trim().to_string();
    if !term.is_empty() {
        terms.push(term);
    }

    terms
}

/// Parse a random term like "(1 | taxon)" or "(log_wing_c | taxon)".
fn parse_random_term(term: &str) -> Result<RandomTerm> {
    // Strip the outer parentheses
    let inner = term
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| MorphMixError::Formula(format!("malformed random term: {}", term)))?;

    let parts: Vec<&str> = inner.split('|').collect();
    if parts.len() != 2 {
        return Err(MorphMixError::Formula(format!(
            "random term must contain exactly one '|': {}",
            term
        )));
    }

    let group = parts[1].trim().to_string();
    if group.is_empty() || group.contains(|c: char| !c.is_alphanumeric() && c != '_') {
        return Err(MorphMixError::Formula(format!(
            "invalid grouping variable in random term: {}",
            term
        )));
    }

    // The left side of '|' is itself a '+'-separated list: 1, 0, or variables
    let mut intercept = true;
    let mut slopes = Vec::new();
    for token in parts[0].split('+') {
        let token = token.trim();
        match token {
            "" => {
                return Err(MorphMixError::Formula(format!(
                    "empty term on the left of '|': {}",
                    term
                )))
            }
            "1" => intercept = true,
            "0" | "-1" => intercept = false,
            var => {
                if !slopes.iter().any(|s| s == var) {
                    slopes.push(var.to_string());
                }
            }
        }
    }

    if !intercept && slopes.is_empty() {
        return Err(MorphMixError::Formula(format!(
            "random term declares neither intercept nor slope: {}",
            term
        )));
    }
    if slopes.len() > 1 {
        return Err(MorphMixError::Unsupported(format!(
            "at most one random slope is supported, got {}: {}",
            slopes.len(),
            term
        )));
    }

    Ok(RandomTerm {
        intercept,
        slopes,
        group,
    })
}

/// Parse a formula string into structured components.
///
/// Handles:
/// - Fixed effects: plain column names
/// - Intercept removal: 0 + ... or -1
/// - One random term: (1 | g), (x | g), (1 + x | g), (0 + x | g)
///
/// # Arguments
/// * `formula` - lmer-style formula like "y ~ x + (x | g)"
///
/// # Returns
/// Parsed formula structure with all terms identified
pub fn parse_formula(formula: &str) -> Result<ParsedFormula> {
    // Split into response and predictors
    let parts: Vec<&str> = formula.split('~').collect();
    if parts.len() != 2 {
        return Err(MorphMixError::Formula(format!(
            "formula must contain exactly one '~': {}",
            formula
        )));
    }

    let response = parts[0].trim().to_string();
    if response.is_empty() {
        return Err(MorphMixError::Formula(format!(
            "formula has no response variable: {}",
            formula
        )));
    }
    let mut rhs = parts[1].trim().to_string();

    // Check for intercept removal
    let mut has_intercept = true;

    // Handle "0 +" or "0+"
    if rhs.starts_with("0 +") || rhs.starts_with("0+") {
        has_intercept = false;
        rhs = rhs[if rhs.starts_with("0 +") { 3 } else { 2 }..]
            .trim()
            .to_string();
    }

    // Handle "- 1" or "-1" at end
    if rhs.ends_with("- 1") || rhs.ends_with("-1") {
        has_intercept = false;
        let len = rhs.len();
        rhs = rhs[..len - if rhs.ends_with("- 1") { 3 } else { 2 }]
            .trim()
            .to_string();
        // Remove trailing +
        if rhs.ends_with('+') {
            rhs = rhs[..rhs.len() - 1].trim().to_string();
        }
    }

    let terms = split_terms(&rhs);

    let mut fixed_effects = Vec::new();
    let mut random: Option<RandomTerm> = None;

    for term in terms {
        if term.starts_with('(') && term.contains('|') {
            if random.is_some() {
                return Err(MorphMixError::Unsupported(format!(
                    "only one random term is supported: {}",
                    formula
                )));
            }
            random = Some(parse_random_term(&term)?);
        } else if term.contains(|c| matches!(c, '(' | ')' | '|' | '*' | ':')) {
            return Err(MorphMixError::Formula(format!(
                "unsupported fixed-effect syntax '{}' in: {}",
                term, formula
            )));
        } else if !fixed_effects.contains(&term) {
            fixed_effects.push(term);
        }
    }

    let random = random.ok_or_else(|| {
        MorphMixError::Formula(format!(
            "a mixed-model formula needs a random term '(... | group)': {}",
            formula
        ))
    })?;

    Ok(ParsedFormula {
        response,
        fixed_effects,
        has_intercept,
        random,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_random_intercept() {
        let parsed = parse_formula("y ~ x + (1 | g)").unwrap();
        assert_eq!(parsed.response, "y");
        assert_eq!(parsed.fixed_effects, vec!["x"]);
        assert!(parsed.has_intercept);
        assert!(parsed.random.intercept);
        assert!(parsed.random.slopes.is_empty());
        assert_eq!(parsed.random.group, "g");
        assert_eq!(parsed.random.dimension(), 1);
    }

    #[test]
    fn test_parse_random_slope() {
        let parsed = parse_formula("y ~ x + (x | g)").unwrap();
        assert!(parsed.random.intercept);
        assert_eq!(parsed.random.slopes, vec!["x"]);
        assert_eq!(parsed.random.dimension(), 2);
    }

    #[test]
    fn test_parse_explicit_intercept_plus_slope() {
        let parsed = parse_formula("y ~ x + (1 + x | g)").unwrap();
        assert!(parsed.random.intercept);
        assert_eq!(parsed.random.slopes, vec!["x"]);
    }

    #[test]
    fn test_parse_slope_only_random_term() {
        let parsed = parse_formula("y ~ x + (0 + x | g)").unwrap();
        assert!(!parsed.random.intercept);
        assert_eq!(parsed.random.slopes, vec!["x"]);
        assert_eq!(parsed.random.dimension(), 1);
    }

    #[test]
    fn test_parse_multiple_fixed_effects() {
        let parsed = parse_formula("y ~ x1 + x2 + (1 | g)").unwrap();
        assert_eq!(parsed.fixed_effects, vec!["x1", "x2"]);
    }

    #[test]
    fn test_no_intercept() {
        let parsed = parse_formula("y ~ 0 + x + (1 | g)").unwrap();
        assert!(!parsed.has_intercept);

        let parsed2 = parse_formula("y ~ x + (1 | g) - 1").unwrap();
        assert!(!parsed2.has_intercept);
    }

    #[test]
    fn test_missing_random_term_rejected() {
        let result = parse_formula("y ~ x");
        assert!(matches!(result, Err(MorphMixError::Formula(_))));
    }

    #[test]
    fn test_two_random_terms_rejected() {
        let result = parse_formula("y ~ x + (1 | g) + (1 | h)");
        assert!(matches!(result, Err(MorphMixError::Unsupported(_))));
    }

    #[test]
    fn test_two_random_slopes_rejected() {
        let result = parse_formula("y ~ x + (x1 + x2 | g)");
        assert!(matches!(result, Err(MorphMixError::Unsupported(_))));
    }

    #[test]
    fn test_interaction_syntax_rejected() {
        let result = parse_formula("y ~ x1*x2 + (1 | g)");
        assert!(matches!(result, Err(MorphMixError::Formula(_))));
    }

    #[test]
    fn test_missing_tilde_rejected() {
        let result = parse_formula("y + x");
        assert!(matches!(result, Err(MorphMixError::Formula(_))));
    }

    #[test]
    fn test_empty_random_lhs_rejected() {
        let result = parse_formula("y ~ x + (0 | g)");
        assert!(matches!(result, Err(MorphMixError::Formula(_))));
    }
}
