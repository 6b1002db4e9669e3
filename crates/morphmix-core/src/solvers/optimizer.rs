// =============================================================================
// Derivative-Free Optimizers
// =============================================================================
//
// The profiled deviance is cheap to evaluate (one Cholesky of a small
// augmented matrix) but has no convenient analytic gradient here, so the
// fitter searches it with derivative-free methods:
//
//   - Brent's method for the random-intercept case, where θ is a single
//     non-negative scalar;
//   - Nelder-Mead for the intercept + slope case, where θ is the three
//     entries of a 2×2 lower-triangular factor.
//
// Both report convergence instead of erroring: a fit that ran out of
// iterations still returns its best point, flagged `converged: false`.
//
// =============================================================================

/// Result from Brent's optimization
#[derive(Debug, Clone)]
pub struct BrentResult {
    pub x_min: f64,
    pub f_min: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Brent's method for 1D minimization.
///
/// Finds the minimum of f(x) in the interval [a, b]. Combines golden-section
/// steps with parabolic interpolation; superlinear on smooth objectives and
/// guaranteed to stay bracketed.
///
/// # Arguments
/// * `f` - Function to minimize
/// * `a` - Lower bound of search interval
/// * `b` - Upper bound of search interval
/// * `tol` - Convergence tolerance
/// * `max_iter` - Maximum iterations
pub fn brent_minimize<F>(f: F, a: f64, b: f64, tol: f64, max_iter: usize) -> BrentResult
where
    F: Fn(f64) -> f64,
{
    let golden = 0.381966011250105; // (3 - sqrt(5)) / 2

    let mut a = a;
    let mut b = b;
    let mut x = a + golden * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = f(x);
    let mut fw = fx;
    let mut fv = fx;

    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for iter in 0..max_iter {
        let mid = 0.5 * (a + b);
        let tol1 = tol * x.abs() + 1e-10;
        let tol2 = 2.0 * tol1;

        // Check convergence
        if (x - mid).abs() <= tol2 - 0.5 * (b - a) {
            return BrentResult {
                x_min: x,
                f_min: fx,
                iterations: iter + 1,
                converged: true,
            };
        }

        // Try parabolic interpolation
        let mut use_golden = true;
        let mut u;

        if e.abs() > tol1 {
            // Fit parabola through x, w, v
            let r = (x - w) * (fx - fv);
            let q = (x - v) * (fx - fw);
            let p = (x - v) * q - (x - w) * r;
            let q = 2.0 * (q - r);

            let (p, q) = if q > 0.0 { (-p, q) } else { (p, -q) };

            let e_old = e;
            e = d;

            // Accept parabolic step if it's in bounds and small enough
            if p.abs() < (0.5 * q * e_old).abs() && p > q * (a - x) && p < q * (b - x) {
                d = p / q;
                u = x + d;

                // Don't evaluate too close to endpoints
                if u - a < tol2 || b - u < tol2 {
                    d = if x < mid { tol1 } else { -tol1 };
                }
                use_golden = false;
            }
        }

        if use_golden {
            // Golden section step
            e = if x < mid { b - x } else { a - x };
            d = golden * e;
        }

        // Evaluate at new point
        u = if d.abs() >= tol1 {
            x + d
        } else if d > 0.0 {
            x + tol1
        } else {
            x - tol1
        };

        let fu = f(u);

        // Update bracketing interval
        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    BrentResult {
        x_min: x,
        f_min: fx,
        iterations: max_iter,
        converged: false,
    }
}

// =============================================================================
// Nelder-Mead
// =============================================================================

/// Result from Nelder-Mead optimization
#[derive(Debug, Clone)]
pub struct NelderMeadResult {
    pub x_min: Vec<f64>,
    pub f_min: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Nelder-Mead simplex minimization.
///
/// Standard coefficients (reflection 1, expansion 2, contraction 0.5,
/// shrink 0.5). The initial simplex is `x0` plus one vertex per dimension
/// offset by `step`. The best vertex only ever improves, so the returned
/// point is never worse than the starting point - the fitter relies on this
/// when warm-starting a richer model from a nested one.
///
/// Objectives may return `f64::INFINITY` to veto a region (used for the
/// non-negativity bounds on diagonal θ entries); the simplex simply moves
/// away from vetoed points.
pub fn nelder_mead<F>(
    f: F,
    x0: &[f64],
    step: f64,
    tol: f64,
    max_iter: usize,
) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    let dim = x0.len();
    assert!(dim > 0, "nelder_mead needs at least one dimension");

    // Initial simplex: x0 and x0 + step * e_i
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    simplex.push((x0.to_vec(), f(x0)));
    for i in 0..dim {
        let mut vertex = x0.to_vec();
        vertex[i] += step;
        let fv = f(&vertex);
        simplex.push((vertex, fv));
    }

    let centroid = |simplex: &[(Vec<f64>, f64)]| -> Vec<f64> {
        // Centroid of all vertices except the worst (last)
        let mut c = vec![0.0; dim];
        for (vertex, _) in &simplex[..dim] {
            for i in 0..dim {
                c[i] += vertex[i];
            }
        }
        for ci in c.iter_mut() {
            *ci /= dim as f64;
        }
        c
    };

    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..max_iter {
        iterations = iter + 1;
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let f_best = simplex[0].1;
        let f_worst = simplex[dim].1;

        // Convergence: function spread across the simplex is negligible
        if f_worst.is_finite() && (f_worst - f_best).abs() <= tol * (1.0 + f_best.abs()) {
            converged = true;
            break;
        }

        let c = centroid(&simplex);
        let worst = simplex[dim].0.clone();
        let f_second_worst = simplex[dim - 1].1;

        // Reflection
        let reflected: Vec<f64> = c
            .iter()
            .zip(&worst)
            .map(|(&ci, &wi)| ci + (ci - wi))
            .collect();
        let f_reflected = f(&reflected);

        if f_reflected < f_best {
            // Expansion
            let expanded: Vec<f64> = c
                .iter()
                .zip(&worst)
                .map(|(&ci, &wi)| ci + 2.0 * (ci - wi))
                .collect();
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[dim] = (expanded, f_expanded);
            } else {
                simplex[dim] = (reflected, f_reflected);
            }
        } else if f_reflected < f_second_worst {
            simplex[dim] = (reflected, f_reflected);
        } else {
            // Contraction (toward the better of worst/reflected)
            let use_reflected = f_reflected < simplex[dim].1;
            let target: Vec<f64> = if use_reflected {
                reflected.clone()
            } else {
                simplex[dim].0.clone()
            };
            let f_target = if use_reflected {
                f_reflected
            } else {
                simplex[dim].1
            };
            let contracted: Vec<f64> = c
                .iter()
                .zip(&target)
                .map(|(&ci, &ti)| ci + 0.5 * (ti - ci))
                .collect();
            let f_contracted = f(&contracted);

            if f_contracted < f_target {
                simplex[dim] = (contracted, f_contracted);
            } else {
                // Shrink everything toward the best vertex
                let best = simplex[0].0.clone();
                for entry in simplex.iter_mut().skip(1) {
                    let shrunk: Vec<f64> = best
                        .iter()
                        .zip(&entry.0)
                        .map(|(&bi, &vi)| bi + 0.5 * (vi - bi))
                        .collect();
                    let fs = f(&shrunk);
                    *entry = (shrunk, fs);
                }
            }
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    NelderMeadResult {
        x_min: simplex[0].0.clone(),
        f_min: simplex[0].1,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brent_minimize_quadratic() {
        // Minimize (x - 2)^2
        let result = brent_minimize(|x| (x - 2.0).powi(2), 0.0, 5.0, 1e-6, 100);

        assert!(result.converged);
        assert!((result.x_min - 2.0).abs() < 1e-5);
        assert!(result.f_min < 1e-10);
    }

    #[test]
    fn test_brent_minimize_cosine() {
        // Minimize cos(x) in [2, 5] - minimum at π ≈ 3.14159
        let result = brent_minimize(|x| x.cos(), 2.0, 5.0, 1e-6, 100);

        assert!(result.converged);
        assert!((result.x_min - std::f64::consts::PI).abs() < 1e-5);
    }

    #[test]
    fn test_brent_minimize_at_boundary() {
        // Monotonically decreasing in [0, 5] => minimum at b=5
        let result = brent_minimize(|x| -x, 0.0, 5.0, 1e-6, 100);
        assert!((result.x_min - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_nelder_mead_quadratic_bowl() {
        // Minimize (x-1)^2 + (y+2)^2
        let result = nelder_mead(
            |p| (p[0] - 1.0).powi(2) + (p[1] + 2.0).powi(2),
            &[0.0, 0.0],
            0.5,
            1e-10,
            500,
        );

        assert!(result.converged);
        assert!((result.x_min[0] - 1.0).abs() < 1e-4);
        assert!((result.x_min[1] + 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_nelder_mead_rosenbrock() {
        // The classic banana valley; minimum at (1, 1)
        let result = nelder_mead(
            |p| {
                let a = 1.0 - p[0];
                let b = p[1] - p[0] * p[0];
                a * a + 100.0 * b * b
            },
            &[-1.2, 1.0],
            0.5,
            1e-12,
            2000,
        );

        assert!((result.x_min[0] - 1.0).abs() < 1e-3);
        assert!((result.x_min[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_nelder_mead_never_worse_than_start() {
        let f = |p: &[f64]| p[0] * p[0] + p[1] * p[1];
        let start = [3.0, 4.0];
        let result = nelder_mead(f, &start, 0.5, 1e-8, 10);
        assert!(result.f_min <= f(&start));
    }

    #[test]
    fn test_nelder_mead_respects_infinity_veto() {
        // Minimum of (x-2)^2 subject to x >= 0, with x < 0 vetoed
        let result = nelder_mead(
            |p| {
                if p[0] < 0.0 {
                    f64::INFINITY
                } else {
                    (p[0] - 2.0).powi(2)
                }
            },
            &[5.0],
            1.0,
            1e-10,
            500,
        );
        assert!((result.x_min[0] - 2.0).abs() < 1e-4);
    }
}
