// =============================================================================
// Shrinkage / Partial Pooling Summary
// =============================================================================
//
// The defining behavior of a mixed model: per-group estimates are pulled
// toward the population estimate in proportion to how little group-specific
// data is available. This module makes that visible by laying three sets of
// estimates side by side for every group:
//
//   - NO POOLING: an ordinary least-squares line fitted to the group's own
//     observations alone (undefined pieces fall back to the group mean);
//   - PARTIAL POOLING: the mixed model's group line, fixed effect + BLUP;
//   - (implicitly) COMPLETE POOLING: the fixed effect alone, which is where
//     a group with no data at all would land.
//
// The summary also carries the per-group predictor mean and sample count,
// which is exactly the per-taxon table the shrinkage chart plots.
//
// =============================================================================

use ndarray::Array1;

use crate::data::ObservationTable;
use crate::error::Result;
use crate::solvers::LmmFit;

/// Per-group comparison of no-pooling and partially pooled estimates.
#[derive(Debug, Clone)]
pub struct GroupShrinkage {
    /// Group level label.
    pub level: String,
    /// Observations in this group.
    pub n_obs: usize,
    /// Group mean of the predictor.
    pub predictor_mean: f64,
    /// Within-group OLS intercept (group mean when the slope is undefined).
    pub no_pool_intercept: f64,
    /// Within-group OLS slope; None when the group is too small or its
    /// predictor has no spread.
    pub no_pool_slope: Option<f64>,
    /// Mixed-model group intercept: fixed + random.
    pub mixed_intercept: f64,
    /// Mixed-model group slope: fixed + random.
    pub mixed_slope: f64,
    /// The random-intercept deviation alone (0 when it does not vary).
    pub ranef_intercept: f64,
    /// The random-slope deviation alone (0 when it does not vary).
    pub ranef_slope: f64,
}

/// Build the per-group shrinkage summary for a fitted model.
///
/// `predictor` names the x variable of the group lines - for this
/// workflow, the centered log wing length. It must be a column of
/// `table`, which must be the table the model was fitted to (the group
/// levels must match).
pub fn shrinkage_summary(
    fit: &LmmFit,
    table: &ObservationTable,
    predictor: &str,
) -> Result<Vec<GroupShrinkage>> {
    let x = table.column(predictor)?;
    let y = table.column(&fit.design.formula.response)?;

    let design = &fit.design;
    let g = design.n_groups();

    // Fixed-effect intercept and predictor slope (0 when absent)
    let fixed_intercept = coefficient(fit, "(Intercept)");
    let fixed_slope = coefficient(fit, predictor);

    // Positions of the varying coefficients within the random block
    let ranef_int_col = design
        .random_names
        .iter()
        .position(|n| n == "(Intercept)");
    let ranef_slope_col = design.random_names.iter().position(|n| n == predictor);

    let mut rows = Vec::with_capacity(g);
    for (j, level) in design.group_levels.iter().enumerate() {
        let members: Vec<usize> = design
            .group_assignment
            .iter()
            .enumerate()
            .filter(|(_, &grp)| grp == j)
            .map(|(row, _)| row)
            .collect();

        let (no_pool_intercept, no_pool_slope, predictor_mean) =
            within_group_ols(x, y, &members);

        let ranef_intercept = ranef_int_col
            .map(|c| fit.random_effects[[j, c]])
            .unwrap_or(0.0);
        let ranef_slope = ranef_slope_col
            .map(|c| fit.random_effects[[j, c]])
            .unwrap_or(0.0);

        rows.push(GroupShrinkage {
            level: level.clone(),
            n_obs: members.len(),
            predictor_mean,
            no_pool_intercept,
            no_pool_slope,
            mixed_intercept: fixed_intercept + ranef_intercept,
            mixed_slope: fixed_slope + ranef_slope,
            ranef_intercept,
            ranef_slope,
        });
    }

    Ok(rows)
}

/// Look up a fixed-effect coefficient by design-matrix column name.
fn coefficient(fit: &LmmFit, name: &str) -> f64 {
    fit.design
        .fixed_names
        .iter()
        .position(|n| n == name)
        .map(|i| fit.fixed_effects[i])
        .unwrap_or(0.0)
}

/// OLS of y on x restricted to the given rows.
///
/// Returns (intercept, slope, predictor mean). The slope is None when
/// there are fewer than two rows or the predictor has no spread; the
/// intercept then degrades to the group's response mean.
fn within_group_ols(
    x: &Array1<f64>,
    y: &Array1<f64>,
    rows: &[usize],
) -> (f64, Option<f64>, f64) {
    let n = rows.len() as f64;
    if rows.is_empty() {
        return (0.0, None, 0.0);
    }

    let x_mean = rows.iter().map(|&r| x[r]).sum::<f64>() / n;
    let y_mean = rows.iter().map(|&r| y[r]).sum::<f64>() / n;

    if rows.len() < 2 {
        return (y_mean, None, x_mean);
    }

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &r in rows {
        let dx = x[r] - x_mean;
        sxx += dx * dx;
        sxy += dx * (y[r] - y_mean);
    }

    if sxx < 1e-12 {
        return (y_mean, None, x_mean);
    }

    let slope = sxy / sxx;
    (y_mean - slope * x_mean, Some(slope), x_mean)
}

// =============================================================================
// Tests
// =============================================================================
