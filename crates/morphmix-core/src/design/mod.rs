// =============================================================================
// Design Matrices
// =============================================================================
//
// Turns an observation table plus a parsed formula into the matrices the
// solver works with:
//
//   y - response vector (n)
//   X - fixed-effects design matrix (n × p), intercept column first
//   Z - random-effects design matrix (n × g·k), one k-wide block per group
//
// Z BLOCK LAYOUT
// --------------
// Groups are ordered by the table's sorted level index. For a row in group
// j, the k columns Z[row, j·k .. j·k+k] hold the row's random-effect
// regressors (a 1 for the intercept, the slope variable's value for a
// slope); every other entry in the row is zero. The solver's relative
// covariance factor Λ(θ) repeats one k×k lower-triangular block along this
// same layout.
//
// =============================================================================

use ndarray::{Array1, Array2};

use crate::data::ObservationTable;
use crate::error::{MorphMixError, Result};
use crate::formula::ParsedFormula;

/// Everything the solver needs, extracted from a table + formula.
#[derive(Debug, Clone)]
pub struct ModelDesign {
    pub formula: ParsedFormula,
    /// Response vector (n).
    pub y: Array1<f64>,
    /// Fixed-effects design matrix (n × p).
    pub x: Array2<f64>,
    /// Column labels for `x`, "(Intercept)" first when present.
    pub fixed_names: Vec<String>,
    /// Random-effects design matrix (n × g·k).
    pub z: Array2<f64>,
    /// Per-group random-effect dimension (1 or 2).
    pub k: usize,
    /// Labels for the k random coefficients.
    pub random_names: Vec<String>,
    /// Group levels, sorted; Z block j belongs to level j.
    pub group_levels: Vec<String>,
    /// Level index per row.
    pub group_assignment: Vec<usize>,
    /// Observations per level.
    pub group_counts: Vec<usize>,
}

impl ModelDesign {
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_fixed(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_groups(&self) -> usize {
        self.group_levels.len()
    }
}

/// Build the model design from a table and a parsed formula.
///
/// The grouping variable is the table's label column; the formula's group
/// name must match nothing in the numeric columns (it is the taxon label).
/// Every fixed effect and random slope must name an existing numeric column.
pub fn build_design(table: &ObservationTable, formula: &ParsedFormula) -> Result<ModelDesign> {
    let n = table.n_rows();

    // Response
    let y = table.column(&formula.response)?.clone();

    // The formula's grouping variable is the table's label column. A numeric
    // column with the same name would be ambiguous.
    if table.has_column(&formula.random.group) {
        return Err(MorphMixError::InvalidValue(format!(
            "grouping variable '{}' collides with a numeric column",
            formula.random.group
        )));
    }

    // Fixed-effects matrix: intercept column first, then named columns
    let p = formula.has_intercept as usize + formula.fixed_effects.len();
    if p == 0 {
        return Err(MorphMixError::EmptyInput(
            "model has no fixed effects".to_string(),
        ));
    }
    let mut x = Array2::zeros((n, p));
    let mut fixed_names = Vec::with_capacity(p);
    let mut col = 0;
    if formula.has_intercept {
        x.column_mut(col).fill(1.0);
        fixed_names.push("(Intercept)".to_string());
        col += 1;
    }
    for name in &formula.fixed_effects {
        let values = table.column(name)?;
        for row in 0..n {
            x[[row, col]] = values[row];
        }
        fixed_names.push(name.clone());
        col += 1;
    }

    // Random-effects matrix
    let k = formula.random.dimension();
    if k == 0 || k > 2 {
        return Err(MorphMixError::Unsupported(format!(
            "random term dimension {} (only intercept and/or one slope)",
            k
        )));
    }
    let groups = table.groups();
    let g = groups.n_levels();
    let assignment = groups.assignment().to_vec();

    let mut random_names = Vec::with_capacity(k);
    if formula.random.intercept {
        random_names.push("(Intercept)".to_string());
    }
    for name in &formula.random.slopes {
        random_names.push(name.clone());
    }

    let slope_values = match formula.random.slopes.first() {
        Some(name) => Some(table.column(name)?.clone()),
        None => None,
    };

    let mut z = Array2::zeros((n, g * k));
    for row in 0..n {
        let base = assignment[row] * k;
        let mut c = 0;
        if formula.random.intercept {
            z[[row, base + c]] = 1.0;
            c += 1;
        }
        if let Some(slope) = &slope_values {
            z[[row, base + c]] = slope[row];
        }
    }

    Ok(ModelDesign {
        formula: formula.clone(),
        y,
        x,
        fixed_names,
        z,
        k,
        random_names,
        group_levels: groups.levels().to_vec(),
        group_assignment: assignment,
        group_counts: groups.counts().to_vec(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse_formula;
    use ndarray::array;

    fn table() -> ObservationTable {
        let labels = ["a", "b", "a", "b"].iter().map(|s| s.to_string()).collect();
        let mut t = ObservationTable::new(labels).unwrap();
        t.push_column("x", array![1.0, 2.0, 3.0, 4.0]).unwrap();
        t.push_column("y", array![1.5, 2.5, 3.5, 4.5]).unwrap();
        t
    }

    #[test]
    fn test_random_intercept_design() {
        let formula = parse_formula("y ~ x + (1 | taxon)").unwrap();
        let design = build_design(&table(), &formula).unwrap();

        assert_eq!(design.n_obs(), 4);
        assert_eq!(design.n_fixed(), 2);
        assert_eq!(design.fixed_names, vec!["(Intercept)", "x"]);
        assert_eq!(design.k, 1);
        assert_eq!(design.n_groups(), 2);

        // X: intercept column then x
        assert_eq!(design.x[[0, 0]], 1.0);
        assert_eq!(design.x[[2, 1]], 3.0);

        // Z: one indicator column per group
        assert_eq!(design.z.ncols(), 2);
        assert_eq!(design.z[[0, 0]], 1.0); // row 0 in group "a"
        assert_eq!(design.z[[0, 1]], 0.0);
        assert_eq!(design.z[[1, 1]], 1.0); // row 1 in group "b"
    }

    #[test]
    fn test_random_slope_design() {
        let formula = parse_formula("y ~ x + (x | taxon)").unwrap();
        let design = build_design(&table(), &formula).unwrap();

        assert_eq!(design.k, 2);
        assert_eq!(design.z.ncols(), 4);
        assert_eq!(design.random_names, vec!["(Intercept)", "x"]);

        // Row 1 is in group "b" → block columns 2..4 hold [1, x]
        assert_eq!(design.z[[1, 2]], 1.0);
        assert_eq!(design.z[[1, 3]], 2.0);
        assert_eq!(design.z[[1, 0]], 0.0);
        assert_eq!(design.z[[1, 1]], 0.0);
    }

    #[test]
    fn test_unknown_response_rejected() {
        let formula = parse_formula("missing ~ x + (1 | taxon)").unwrap();
        assert!(matches!(
            build_design(&table(), &formula),
            Err(MorphMixError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_unknown_slope_rejected() {
        let formula = parse_formula("y ~ x + (w | taxon)").unwrap();
        assert!(matches!(
            build_design(&table(), &formula),
            Err(MorphMixError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_group_name_collision_rejected() {
        let formula = parse_formula("y ~ x + (1 | x)").unwrap();
        assert!(matches!(
            build_design(&table(), &formula),
            Err(MorphMixError::InvalidValue(_))
        ));
    }
}
