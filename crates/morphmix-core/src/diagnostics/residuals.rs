// =============================================================================
// Residuals
// =============================================================================
//
// Pure functions from (observed, fitted) to row-aligned residual vectors.
// The fitted values of a mixed model are conditional on the estimated
// group effects, so these are conditional residuals - the quantity the
// residuals-vs-fitted diagnostic chart wants.
//
// =============================================================================

use ndarray::Array1;

/// Raw response residuals: y − fitted, aligned by row order.
pub fn resid_response(y: &Array1<f64>, fitted: &Array1<f64>) -> Array1<f64> {
    y - fitted
}

/// Pearson residuals: (y − fitted) / σ̂.
///
/// For a Gaussian model these are just the raw residuals on a standard
/// deviation scale, which makes "roughly within ±2" a usable eyeball rule.
pub fn resid_pearson(y: &Array1<f64>, fitted: &Array1<f64>, sigma: f64) -> Array1<f64> {
    let raw = resid_response(y, fitted);
    if sigma > 0.0 {
        raw.mapv(|r| r / sigma)
    } else {
        raw
    }
}
