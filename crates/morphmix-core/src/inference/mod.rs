// =============================================================================
// Statistical Inference
// =============================================================================
//
// This module provides tools for statistical inference on fitted models:
//   - P-values: Test if coefficients are significantly different from zero
//   - Confidence intervals: Range estimates for true parameter values
//   - Likelihood-ratio tests: Compare nested model fits
//
// A NOTE ON DEGREES OF FREEDOM
// ----------------------------
// Exact denominator degrees of freedom for mixed models are not well
// defined; the fixed-effect t-statistics here use n − p, which is the
// simple large-sample approximation. For the sample sizes this workflow
// targets (hundreds of observations, a handful of fixed effects) the
// difference from fancier corrections is negligible.
//
// IMPORTANT CAVEATS:
// - Statistical significance ≠ practical significance
// - With large samples, tiny effects become "significant"
// - Always consider the magnitude of effects, not just p-values
//
// =============================================================================

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

use crate::error::{MorphMixError, Result};
use crate::solvers::LmmFit;

// =============================================================================
// P-Value Calculation
// =============================================================================

/// Calculate two-tailed p-value from a z-statistic.
///
/// Uses the standard normal distribution.
/// Appropriate for large samples or when variance is known.
///
/// # Arguments
/// * `z` - The z-statistic (coefficient / standard_error)
///
/// # Returns
/// P-value: probability of seeing a test statistic this extreme or more,
/// assuming the null hypothesis (β = 0) is true.
pub fn pvalue_z(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }

    let normal = Normal::new(0.0, 1.0).unwrap();

    // Two-tailed test: probability in both tails
    // P(|Z| > |z|) = 2 * P(Z > |z|) = 2 * (1 - Φ(|z|))
    2.0 * (1.0 - normal.cdf(z.abs()))
}

/// Calculate two-tailed p-value from a t-statistic.
///
/// Uses Student's t-distribution with specified degrees of freedom.
/// More appropriate for small samples when variance is estimated.
///
/// # Arguments
/// * `t` - The t-statistic (coefficient / standard_error)
/// * `df` - Degrees of freedom (n − p here)
pub fn pvalue_t(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df <= 0.0 {
        return f64::NAN;
    }

    // For very large df, use normal approximation for efficiency
    if df > 1000.0 {
        return pvalue_z(t);
    }

    let t_dist = match StudentsT::new(0.0, 1.0, df) {
        Ok(d) => d,
        Err(_) => return f64::NAN,
    };

    // Two-tailed test
    2.0 * (1.0 - t_dist.cdf(t.abs()))
}

// =============================================================================
// Confidence Intervals
// =============================================================================

/// Calculate confidence interval using the t-distribution.
///
/// # Arguments
/// * `estimate` - Point estimate (coefficient value)
/// * `std_error` - Standard error of the estimate
/// * `df` - Degrees of freedom
/// * `confidence` - Confidence level (e.g., 0.95 for 95% CI)
///
/// # Returns
/// (lower_bound, upper_bound)
pub fn confidence_interval_t(
    estimate: f64,
    std_error: f64,
    df: f64,
    confidence: f64,
) -> (f64, f64) {
    if !estimate.is_finite() || !std_error.is_finite() || std_error <= 0.0 || df <= 0.0 {
        return (f64::NAN, f64::NAN);
    }

    let t_dist = match StudentsT::new(0.0, 1.0, df) {
        Ok(d) => d,
        Err(_) => return (f64::NAN, f64::NAN),
    };

    let alpha = 1.0 - confidence;
    let t_critical = t_dist.inverse_cdf(1.0 - alpha / 2.0);

    let margin = t_critical * std_error;
    (estimate - margin, estimate + margin)
}

// =============================================================================
// Likelihood-Ratio Test
// =============================================================================

/// Result of a likelihood-ratio test between two nested fits.
#[derive(Debug, Clone)]
pub struct LrtResult {
    /// The test statistic, deviance(null) − deviance(alternative).
    pub statistic: f64,
    /// Difference in parameter counts.
    pub df: usize,
    /// Chi-squared tail probability.
    pub p_value: f64,
}

/// Likelihood-ratio test for two nested maximum-likelihood fits.
///
/// The null model must be the smaller one. Both fits must use plain ML:
/// REML criteria of models with different fixed effects are not
/// comparable, so REML fits are refused.
///
/// When the tested parameter is a variance component, the null value sits
/// on the boundary of the parameter space and the chi-squared reference
/// distribution makes the test conservative. That direction of error is
/// acceptable for this workflow.
pub fn likelihood_ratio_test(null: &LmmFit, alt: &LmmFit) -> Result<LrtResult> {
    if null.reml || alt.reml {
        return Err(MorphMixError::InvalidValue(
            "likelihood-ratio test requires ML fits, not REML".to_string(),
        ));
    }
    if null.n_obs != alt.n_obs {
        return Err(MorphMixError::DimensionMismatch(format!(
            "fits use different data: {} vs {} observations",
            null.n_obs, alt.n_obs
        )));
    }
    if alt.n_params <= null.n_params {
        return Err(MorphMixError::InvalidValue(format!(
            "alternative model must have more parameters than the null \
             ({} vs {})",
            alt.n_params, null.n_params
        )));
    }

    let statistic = (null.deviance - alt.deviance).max(0.0);
    let df = alt.n_params - null.n_params;

    let chi2 = ChiSquared::new(df as f64)
        .map_err(|e| MorphMixError::InvalidValue(format!("chi-squared df {}: {}", df, e)))?;
    let p_value = 1.0 - chi2.cdf(statistic);

    Ok(LrtResult {
        statistic,
        df,
        p_value,
    })
}

// =============================================================================
// Significance Stars (for summary tables)
// =============================================================================

/// Get significance stars for a p-value.
///
/// Returns a string of stars indicating significance level:
/// - "***" : p < 0.001
/// - "**"  : p < 0.01
/// - "*"   : p < 0.05
/// - "."   : p < 0.1
/// - ""    : p >= 0.1
pub fn significance_stars(pvalue: f64) -> &'static str {
    if pvalue < 0.001 {
        "***"
    } else if pvalue < 0.01 {
        "**"
    } else if pvalue < 0.05 {
        "*"
    } else if pvalue < 0.1 {
        "."
    } else {
        ""
    }
}

// =============================================================================
// Tests
// =============================================================================
