// =============================================================================
// Model Diagnostics
// =============================================================================
//
// This module provides diagnostic tools for assessing fitted mixed models:
//
// - RESIDUALS: row-aligned prediction errors in raw and scaled form
// - MODEL FIT: AIC and BIC for comparing models on the same data
// - SHRINKAGE: per-group comparison of no-pooling estimates against the
//   partially pooled mixed-model estimates
//
// These diagnostics help answer:
// - Are there patterns in the residuals suggesting model misspecification?
// - Does letting the slope vary by group earn its extra parameters?
// - How hard is each group being pulled toward the population line?
//
// =============================================================================

mod model_fit;
mod residuals;
mod shrinkage;

pub use model_fit::{aic, bic};

pub use residuals::{resid_pearson, resid_response};

pub use shrinkage::{shrinkage_summary, GroupShrinkage};
