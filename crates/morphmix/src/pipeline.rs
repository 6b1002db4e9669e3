use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use morphmix_core::diagnostics::{resid_response, shrinkage_summary};
use morphmix_core::{fit_lmm, likelihood_ratio_test, LmmConfig, LmmFit, LrtResult};

use crate::{dataset, plot, report};

// ---------------------------------------------------------------------------
// The analysis pipeline
// ---------------------------------------------------------------------------
//
// Strictly linear, each step running to completion before the next:
//
//   load → derive columns → fit random-intercept model → fit random-slope
//   model → residuals + charts → write augmented CSV → refit with the
//   per-taxon mean predictor added → charts + comparison report
//
// Errors propagate straight up and end the run; the only reported-but-not-
// fatal condition is optimizer non-convergence, which the fitter logs and
// flags on the result.
// ---------------------------------------------------------------------------

/// Formula of the random-intercept model.
pub const FORMULA_INTERCEPT: &str = "log_beak ~ log_wing_c + (1 | taxon)";
/// Formula of the random intercept + slope model.
pub const FORMULA_SLOPE: &str = "log_beak ~ log_wing_c + (log_wing_c | taxon)";
/// Refit with the per-taxon mean wing length as a group-level predictor.
pub const FORMULA_GROUP_MEAN: &str =
    "log_beak ~ log_wing_c + taxon_mean_wing + (log_wing_c | taxon)";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input dataset CSV.
    pub data: PathBuf,
    /// Directory for charts and the augmented CSV (created if absent).
    pub out_dir: PathBuf,
    /// Fit with REML instead of ML. Disables the likelihood-ratio test.
    pub reml: bool,
}

/// Everything the pipeline produced, for the caller and for tests.
pub struct PipelineOutput {
    pub m_intercept: LmmFit,
    pub m_slope: LmmFit,
    pub m_group_mean: LmmFit,
    pub lrt: Option<LrtResult>,
    pub augmented_csv: PathBuf,
    pub report: String,
}

/// Run the whole workflow.
pub fn run(config: &PipelineConfig) -> Result<PipelineOutput> {
    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("creating output directory {}", config.out_dir.display()))?;

    // ---------------------------------------------------------------- load
    let mut table = dataset::load_csv(&config.data)?;

    // -------------------------------------------------- derive columns
    info!("deriving analysis columns");
    table.append_log("wing_length_mm", "log_wing")?;
    table.append_log("beak_height_mm", "log_beak")?;
    table.append_centered("log_wing", "log_wing_c")?;
    table.append_group_mean("log_wing_c", "taxon_mean_wing")?;
    table.append_group_count("taxon_n")?;

    let lmm_config = LmmConfig {
        reml: config.reml,
        ..LmmConfig::default()
    };

    // ------------------------------------------------------------- fit
    info!("fitting {}", FORMULA_INTERCEPT);
    let m_intercept = fit_lmm(&table, FORMULA_INTERCEPT, &lmm_config)?;
    info!("fitting {}", FORMULA_SLOPE);
    let m_slope = fit_lmm(&table, FORMULA_SLOPE, &lmm_config)?;

    let lrt = if config.reml {
        // REML criteria of different models are not comparable
        None
    } else {
        Some(likelihood_ratio_test(&m_intercept, &m_slope)?)
    };

    // --------------------------------------- residuals and diagnostics
    let y = table.column("log_beak")?.clone();
    let resid_slope = resid_response(&y, &m_slope.fitted);

    table.push_column("fitted", m_slope.fitted.clone())?;
    table.push_column("resid", resid_slope.clone())?;

    info!("rendering diagnostic charts");
    let resid_intercept = resid_response(&y, &m_intercept.fitted);
    plot::residuals_vs_fitted(
        &config.out_dir.join("resid_fitted_intercept.svg"),
        &m_intercept.fitted,
        &resid_intercept,
        "Residuals vs fitted: random intercept",
    )?;
    plot::residuals_vs_fitted(
        &config.out_dir.join("resid_fitted_slope.svg"),
        &m_slope.fitted,
        &resid_slope,
        "Residuals vs fitted: random intercept + slope",
    )?;
    plot::taxon_panels(
        &config.out_dir.join("taxon_panels.svg"),
        &table,
        &m_slope,
        "log_wing_c",
    )?;

    let shrink_rows = shrinkage_summary(&m_slope, &table, "log_wing_c")?;
    plot::shrinkage_chart(
        &config.out_dir.join("shrinkage.svg"),
        &shrink_rows,
        m_slope.fixed_effects[0],
    )?;

    // ------------------------------------------------ intermediate save
    let augmented_csv = config.out_dir.join("observations_augmented.csv");
    dataset::write_csv(&table, &augmented_csv)?;

    // ------------------------------------- refit with added predictor
    info!("fitting {}", FORMULA_GROUP_MEAN);
    let m_group_mean = fit_lmm(&table, FORMULA_GROUP_MEAN, &lmm_config)?;

    let resid_group_mean = resid_response(&y, &m_group_mean.fitted);
    plot::residuals_vs_fitted(
        &config.out_dir.join("resid_fitted_group_mean.svg"),
        &m_group_mean.fitted,
        &resid_group_mean,
        "Residuals vs fitted: + taxon mean wing length",
    )?;

    // ----------------------------------------------------------- report
    let mut text = String::new();
    text.push_str(&report::model_summary("Random intercept", &m_intercept));
    text.push('\n');
    text.push_str(&report::model_summary("Random intercept + slope", &m_slope));
    text.push('\n');
    text.push_str(&report::model_summary(
        "Random intercept + slope, taxon mean added",
        &m_group_mean,
    ));
    text.push('\n');
    text.push_str(&report::comparison(
        "random intercept",
        &m_intercept,
        "random intercept + slope",
        &m_slope,
        lrt.as_ref(),
    ));
    text.push('\n');
    text.push_str(&report::shrinkage(&shrink_rows));

    Ok(PipelineOutput {
        m_intercept,
        m_slope,
        m_group_mean,
        lrt,
        augmented_csv,
        report: text,
    })
}
