use std::fmt::Write as _;

use morphmix_core::diagnostics::{aic, bic, GroupShrinkage};
use morphmix_core::{LmmFit, LrtResult};

// ---------------------------------------------------------------------------
// Text report formatting
// ---------------------------------------------------------------------------
//
// Plain fixed-width tables, lmer-style: variance components first, then the
// fixed effects with significance markers. Everything returns a String so
// the pipeline can both print it and hand it back to tests.
// ---------------------------------------------------------------------------

fn fmt_pvalue(p: f64) -> String {
    if p.is_nan() {
        "NA".to_string()
    } else if p < 1e-16 {
        "<1e-16".to_string()
    } else if p < 1e-4 {
        format!("{:.1e}", p)
    } else {
        format!("{:.4}", p)
    }
}

/// Full summary of one fitted model.
pub fn model_summary(title: &str, fit: &LmmFit) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", "-".repeat(title.len()));
    let _ = writeln!(
        out,
        "criterion: {}   deviance: {:.3}   logLik: {:.3}",
        if fit.reml { "REML" } else { "ML" },
        fit.deviance,
        fit.log_likelihood
    );
    let _ = writeln!(
        out,
        "AIC: {:.3}   BIC: {:.3}   observations: {}   groups: {}",
        aic(fit.log_likelihood, fit.n_params),
        bic(fit.log_likelihood, fit.n_params, fit.n_obs),
        fit.n_obs,
        fit.design.n_groups()
    );
    if !fit.converged {
        let _ = writeln!(out, "WARNING: optimizer did not converge; estimates are the best point found");
    }

    let _ = writeln!(out, "\nRandom effects ({}):", fit.design.formula.random.group);
    for (i, name) in fit.design.random_names.iter().enumerate() {
        let mut line = format!("  {:<14} sd {:.4}", name, fit.variance.group_sd[i]);
        if i == 1 {
            if let Some(rho) = fit.variance.correlation {
                let _ = write!(line, "   corr {:.2}", rho);
            }
        }
        let _ = writeln!(out, "{}", line);
    }
    let _ = writeln!(out, "  {:<14} sd {:.4}", "Residual", fit.variance.residual_sd);

    let _ = writeln!(out, "\nFixed effects:");
    let _ = writeln!(
        out,
        "  {:<18} {:>10} {:>10} {:>8} {:>10}",
        "", "estimate", "std.err", "t value", "Pr(>|t|)"
    );
    for row in fit.fixed_effect_table() {
        let _ = writeln!(
            out,
            "  {:<18} {:>10.4} {:>10.4} {:>8.2} {:>10} {}",
            row.name,
            row.estimate,
            row.std_error,
            row.t_value,
            fmt_pvalue(row.p_value),
            row.stars()
        );
    }

    out
}

/// Side-by-side comparison of two fits, with an optional LRT line.
pub fn comparison(
    label_null: &str,
    null: &LmmFit,
    label_alt: &str,
    alt: &LmmFit,
    lrt: Option<&LrtResult>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Model comparison");
    let _ = writeln!(out, "----------------");
    let _ = writeln!(
        out,
        "  {:<28} {:>8} {:>10} {:>10} {:>10}",
        "", "npar", "logLik", "AIC", "deviance"
    );
    for (label, fit) in [(label_null, null), (label_alt, alt)] {
        let _ = writeln!(
            out,
            "  {:<28} {:>8} {:>10.3} {:>10.3} {:>10.3}",
            label,
            fit.n_params,
            fit.log_likelihood,
            aic(fit.log_likelihood, fit.n_params),
            fit.deviance
        );
    }
    if let Some(test) = lrt {
        let _ = writeln!(
            out,
            "  LRT: chisq = {:.3} on {} df, p = {}",
            test.statistic,
            test.df,
            fmt_pvalue(test.p_value)
        );
    }
    out
}

/// Per-taxon shrinkage table: no-pooling vs partially pooled estimates.
pub fn shrinkage(rows: &[GroupShrinkage]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Shrinkage (no pooling → partial pooling)");
    let _ = writeln!(out, "----------------------------------------");
    let _ = writeln!(
        out,
        "  {:<16} {:>4} {:>9} {:>10} {:>10} {:>10} {:>10}",
        "taxon", "n", "mean(x)", "ols int", "mixed int", "ols slope", "mixed slope"
    );
    for row in rows {
        let ols_slope = match row.no_pool_slope {
            Some(s) => format!("{:>10.4}", s),
            None => format!("{:>10}", "-"),
        };
        let _ = writeln!(
            out,
            "  {:<16} {:>4} {:>9.4} {:>10.4} {:>10.4} {} {:>10.4}",
            row.level,
            row.n_obs,
            row.predictor_mean,
            row.no_pool_intercept,
            row.mixed_intercept,
            ols_slope,
            row.mixed_slope
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphmix_core::{fit_lmm, LmmConfig, ObservationTable};
    use ndarray::Array1;

    fn fitted_model() -> LmmFit {
        let mut labels = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (j, name) in ["g1", "g2", "g3"].iter().enumerate() {
            let offset = (j as f64 - 1.0) * 0.8;
            for i in 0..8 {
                let xi = i as f64 * 0.3;
                labels.push(name.to_string());
                x.push(xi);
                y.push(1.0 + offset + 2.0 * xi + [0.1, -0.05, 0.0, -0.1, 0.05][i % 5]);
            }
        }
        let mut t = ObservationTable::new(labels).unwrap();
        t.push_column("x", Array1::from_vec(x)).unwrap();
        t.push_column("y", Array1::from_vec(y)).unwrap();
        fit_lmm(&t, "y ~ x + (1 | taxon)", &LmmConfig::default()).unwrap()
    }

    #[test]
    fn test_model_summary_sections() {
        let fit = fitted_model();
        let text = model_summary("random intercept model", &fit);
        assert!(text.contains("Random effects (taxon):"));
        assert!(text.contains("Fixed effects:"));
        assert!(text.contains("(Intercept)"));
        assert!(text.contains("Residual"));
        assert!(text.contains("criterion: ML"));
    }

    #[test]
    fn test_comparison_contains_both_labels() {
        let fit = fitted_model();
        let text = comparison("m1", &fit, "m2", &fit, None);
        assert!(text.contains("m1"));
        assert!(text.contains("m2"));
        assert!(text.contains("logLik"));
        assert!(!text.contains("LRT"));
    }

    #[test]
    fn test_fmt_pvalue_ranges() {
        assert_eq!(fmt_pvalue(f64::NAN), "NA");
        assert_eq!(fmt_pvalue(1e-20), "<1e-16");
        assert_eq!(fmt_pvalue(0.25), "0.2500");
        assert!(fmt_pvalue(3.0e-5).contains("e-5"));
    }
}
