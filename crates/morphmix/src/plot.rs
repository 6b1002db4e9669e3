use std::path::Path;

use anyhow::Result;
use morphmix_core::diagnostics::{shrinkage_summary, GroupShrinkage};
use morphmix_core::{LmmFit, ObservationTable};
use ndarray::Array1;
use plotters::prelude::*;

// ---------------------------------------------------------------------------
// Diagnostic charts (SVG)
// ---------------------------------------------------------------------------
//
// Three charts, all purely presentational:
//   - residuals vs fitted, the workhorse misspecification check;
//   - per-taxon panels with the population line and each taxon's own line;
//   - a shrinkage dumbbell connecting no-pooling estimates to the mixed
//     model's partially pooled ones.
// ---------------------------------------------------------------------------

/// Min/max of an iterator with a 5% margin on each side.
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let span = (max - min).max(1e-6);
    (min - 0.05 * span, max + 0.05 * span)
}

/// Fixed-effect coefficient by design-column name, 0 when absent.
fn fixed_coef(fit: &LmmFit, name: &str) -> f64 {
    fit.design
        .fixed_names
        .iter()
        .position(|n| n == name)
        .map(|i| fit.fixed_effects[i])
        .unwrap_or(0.0)
}

/// Residuals against fitted values, with a zero reference line.
pub fn residuals_vs_fitted(
    path: &Path,
    fitted: &Array1<f64>,
    resid: &Array1<f64>,
    title: &str,
) -> Result<()> {
    let root = SVGBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let (x_min, x_max) = padded_range(fitted.iter().copied());
    let (y_min, y_max) = padded_range(resid.iter().copied());
    // Keep the zero line inside the frame
    let y_min = y_min.min(-1e-3);
    let y_max = y_max.max(1e-3);

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("fitted")
        .y_desc("residual")
        .draw()?;

    chart.draw_series(
        fitted
            .iter()
            .zip(resid.iter())
            .map(|(&x, &y)| Circle::new((x, y), 3, BLUE.mix(0.6).filled())),
    )?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(x_min, 0.0), (x_max, 0.0)],
        BLACK.mix(0.5),
    )))?;

    root.present()?;
    Ok(())
}

/// One panel per taxon: its observations, the population line (black) and
/// the taxon's partially pooled line (red).
pub fn taxon_panels(
    path: &Path,
    table: &ObservationTable,
    fit: &LmmFit,
    predictor: &str,
) -> Result<()> {
    let x = table.column(predictor)?;
    let y = table.column(&fit.design.formula.response)?;
    let lines = shrinkage_summary(fit, table, predictor)?;

    let g = fit.design.n_groups();
    let cols = g.min(3);
    let rows = g.div_ceil(cols);

    let width = (cols * 360) as u32;
    let height = (rows * 300) as u32;
    let root = SVGBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((rows, cols));

    // Shared axes so the panels are comparable at a glance
    let (x_min, x_max) = padded_range(x.iter().copied());
    let (y_min, y_max) = padded_range(y.iter().copied());

    let pop_intercept = fixed_coef(fit, "(Intercept)");
    let pop_slope = fixed_coef(fit, predictor);

    for (j, row) in lines.iter().enumerate() {
        let mut chart = ChartBuilder::on(&panels[j])
            .caption(format!("{} (n={})", row.level, row.n_obs), ("sans-serif", 15))
            .margin(8)
            .x_label_area_size(28)
            .y_label_area_size(40)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

        chart
            .configure_mesh()
            .x_labels(4)
            .y_labels(4)
            .draw()?;

        let members: Vec<(f64, f64)> = fit
            .design
            .group_assignment
            .iter()
            .enumerate()
            .filter(|(_, &grp)| grp == j)
            .map(|(r, _)| (x[r], y[r]))
            .collect();

        chart.draw_series(
            members
                .iter()
                .map(|&(xi, yi)| Circle::new((xi, yi), 3, BLUE.mix(0.7).filled())),
        )?;

        chart.draw_series(LineSeries::new(
            [x_min, x_max]
                .iter()
                .map(|&xi| (xi, pop_intercept + pop_slope * xi)),
            BLACK.mix(0.6),
        ))?;

        chart.draw_series(LineSeries::new(
            [x_min, x_max]
                .iter()
                .map(|&xi| (xi, row.mixed_intercept + row.mixed_slope * xi)),
            RED.stroke_width(2),
        ))?;
    }

    root.present()?;
    Ok(())
}

/// Shrinkage dumbbell: per taxon, the no-pooling intercept (open circle)
/// connected to the partially pooled one (filled), with the population
/// intercept as a reference line.
pub fn shrinkage_chart(
    path: &Path,
    rows: &[GroupShrinkage],
    population_intercept: f64,
) -> Result<()> {
    let root = SVGBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let n = rows.len();
    let mut values: Vec<f64> = Vec::with_capacity(2 * n + 1);
    for row in rows {
        values.push(row.no_pool_intercept);
        values.push(row.mixed_intercept);
    }
    values.push(population_intercept);
    let (y_min, y_max) = padded_range(values.into_iter());

    let labels: Vec<String> = rows.iter().map(|r| r.level.clone()).collect();

    let mut chart = ChartBuilder::on(&root)
        .caption("Shrinkage toward the population intercept", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(44)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_labels(n)
        .x_label_formatter(&|v| {
            let i = v.round();
            if i >= 0.0 && (i - v).abs() < 0.25 && (i as usize) < labels.len() {
                labels[i as usize].clone()
            } else {
                String::new()
            }
        })
        .y_desc("group intercept")
        .draw()?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(-0.5, population_intercept), (n as f64 - 0.5, population_intercept)],
        BLACK.mix(0.5),
    )))?;

    for (i, row) in rows.iter().enumerate() {
        let xi = i as f64;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(xi, row.no_pool_intercept), (xi, row.mixed_intercept)],
            BLACK.mix(0.35),
        )))?;
    }

    chart
        .draw_series(rows.iter().enumerate().map(|(i, row)| {
            Circle::new((i as f64, row.no_pool_intercept), 5, BLUE.stroke_width(2))
        }))?
        .label("no pooling")
        .legend(|(x, y)| Circle::new((x + 10, y), 5, BLUE.stroke_width(2)));

    chart
        .draw_series(
            rows.iter()
                .enumerate()
                .map(|(i, row)| Circle::new((i as f64, row.mixed_intercept), 5, RED.filled())),
        )?
        .label("partial pooling")
        .legend(|(x, y)| Circle::new((x + 10, y), 5, RED.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
