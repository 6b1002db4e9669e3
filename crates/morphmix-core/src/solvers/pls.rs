// =============================================================================
// Penalized Least Squares at Fixed θ
// =============================================================================
//
// The engine room of the mixed-model fitter. For the model
//
//     y = Xβ + ZΛ(θ)u + ε,    u ~ N(0, σ²I),   ε ~ N(0, σ²I)
//
// the fixed effects β and the spherical random effects u solve, at a given
// relative covariance factor Λ(θ), one symmetric positive-definite system:
//
//     [Λ'Z'ZΛ + I   Λ'Z'X] [u]   [Λ'Z'y]
//     [X'ZΛ         X'X  ] [β] = [X'y  ]
//
// One Cholesky factorization of this augmented matrix yields everything the
// optimizer needs:
//
//   - the penalized residual sum of squares  r² = ‖y − Xβ − ZΛu‖² + ‖u‖²
//   - log|Λ'Z'ZΛ + I|   (the leading block of the factor)
//   - log|X'X − X'ZΛ(Λ'Z'ZΛ+I)⁻¹Λ'Z'X|   (the trailing block)
//
// and the profiled deviance is then a closed form in r²:
//
//   ML:    log|Λ'Z'ZΛ + I| + n(1 + log(2π r²/n))
//   REML:  add the trailing log-determinant, use n − p denominators
//
// θ is the only thing the outer optimizer searches over; β and σ² have been
// profiled out analytically.
//
// CROSS-PRODUCT CACHE
// -------------------
// Z'Z, Z'X, Z'y, X'X, X'y and y'y depend only on the data, so they are
// computed once per model and reused for every θ evaluation. Each
// evaluation then costs one dense Cholesky of a (g·k + p)-sized matrix.
//
// =============================================================================

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::convert::{invert_symmetric, to_array1, to_array2, to_dmatrix, to_dvector};
use crate::design::ModelDesign;
use crate::error::{MorphMixError, Result};

const LN_2PI: f64 = 1.8378770664093455;

/// Cached cross-products for one model. Built once, evaluated many times.
#[derive(Debug, Clone)]
pub struct PlsCache {
    ztz: DMatrix<f64>,
    ztx: DMatrix<f64>,
    zty: DVector<f64>,
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    yty: f64,
    n: usize,
    p: usize,
    q: usize,
    k: usize,
    g: usize,
}

/// Full solution of the penalized system at one θ.
#[derive(Debug, Clone)]
pub struct PlsSolution {
    /// Profiled deviance at this θ (ML or REML criterion).
    pub deviance: f64,
    /// Fixed-effect estimates β.
    pub beta: Array1<f64>,
    /// Spherical random effects u.
    pub u: Array1<f64>,
    /// Random effects on the data scale, b = Λu, in Z's block layout.
    pub b: Array1<f64>,
    /// Penalized residual sum of squares r².
    pub r2: f64,
    /// Profiled residual variance estimate.
    pub sigma2: f64,
    /// (X'X − X'ZΛ(Λ'Z'ZΛ+I)⁻¹Λ'Z'X)⁻¹; scale by σ² for Var(β).
    pub beta_cov_unscaled: Array2<f64>,
    /// log|Λ'Z'ZΛ + I|.
    pub logdet_l: f64,
    /// Log-determinant of the fixed-effect Schur complement.
    pub logdet_rx: f64,
}

/// The k×k lower-triangular template block T(θ).
///
/// k = 1: [θ₀];  k = 2: [[θ₀, 0], [θ₁, θ₂]]. Diagonal entries must be
/// non-negative for the parameterization to be identifiable.
fn template_block(theta: &[f64], k: usize) -> Option<DMatrix<f64>> {
    match k {
        1 => {
            if theta.len() != 1 || theta[0] < 0.0 {
                return None;
            }
            Some(DMatrix::from_element(1, 1, theta[0]))
        }
        2 => {
            if theta.len() != 3 || theta[0] < 0.0 || theta[2] < 0.0 {
                return None;
            }
            let mut t = DMatrix::zeros(2, 2);
            t[(0, 0)] = theta[0];
            t[(1, 0)] = theta[1];
            t[(1, 1)] = theta[2];
            Some(t)
        }
        _ => None,
    }
}

/// Number of θ parameters for a per-group dimension k.
pub fn n_theta(k: usize) -> usize {
    k * (k + 1) / 2
}

impl PlsCache {
    /// Precompute the cross-products for a model design.
    pub fn new(design: &ModelDesign) -> Self {
        let x = to_dmatrix(&design.x);
        let z = to_dmatrix(&design.z);
        let y = to_dvector(&design.y);

        PlsCache {
            ztz: z.transpose() * &z,
            ztx: z.transpose() * &x,
            zty: z.transpose() * &y,
            xtx: x.transpose() * &x,
            xty: x.transpose() * &y,
            yty: y.dot(&y),
            n: design.n_obs(),
            p: design.n_fixed(),
            q: design.z.ncols(),
            k: design.k,
            g: design.n_groups(),
        }
    }

    pub fn n_obs(&self) -> usize {
        self.n
    }

    pub fn n_fixed(&self) -> usize {
        self.p
    }

    /// Per-group random-effect dimension.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Expand θ into the dense block-diagonal factor Λ (q × q).
    fn lambda(&self, theta: &[f64]) -> Option<DMatrix<f64>> {
        let t = template_block(theta, self.k)?;
        let mut lambda = DMatrix::zeros(self.q, self.q);
        for j in 0..self.g {
            let base = j * self.k;
            for a in 0..self.k {
                for b in 0..=a {
                    lambda[(base + a, base + b)] = t[(a, b)];
                }
            }
        }
        Some(lambda)
    }

    /// Factor the augmented system at θ and extract the solution.
    ///
    /// Returns None when θ is outside the parameter space or the system is
    /// not positive definite (rank-deficient X).
    fn solve_inner(&self, theta: &[f64], reml: bool) -> Option<PlsSolution> {
        let lambda = self.lambda(theta)?;
        let (q, p, n) = (self.q, self.p, self.n);

        // A11 = Λ'Z'ZΛ + I, A12 = Λ'Z'X, rhs = [Λ'Z'y; X'y]
        let lambda_t = lambda.transpose();
        let mut a11 = &lambda_t * &self.ztz * &lambda;
        for i in 0..q {
            a11[(i, i)] += 1.0;
        }
        let a12 = &lambda_t * &self.ztx;
        let rhs1 = &lambda_t * &self.zty;

        let mut m = DMatrix::zeros(q + p, q + p);
        m.view_mut((0, 0), (q, q)).copy_from(&a11);
        m.view_mut((0, q), (q, p)).copy_from(&a12);
        m.view_mut((q, 0), (p, q)).copy_from(&a12.transpose());
        m.view_mut((q, q), (p, p)).copy_from(&self.xtx);

        let mut rhs = DVector::zeros(q + p);
        rhs.view_mut((0, 0), (q, 1)).copy_from(&rhs1);
        rhs.view_mut((q, 0), (p, 1)).copy_from(&self.xty);

        let chol = m.cholesky()?;
        let l = chol.l();

        let mut logdet_l = 0.0;
        for i in 0..q {
            logdet_l += l[(i, i)].ln();
        }
        logdet_l *= 2.0;
        let mut logdet_rx = 0.0;
        for i in q..q + p {
            logdet_rx += l[(i, i)].ln();
        }
        logdet_rx *= 2.0;

        let sol = chol.solve(&rhs);
        // Penalized RSS: r² = y'y − c's at the optimum of the quadratic
        let r2 = (self.yty - rhs.dot(&sol)).max(1e-12);

        let (deviance, sigma2) = if reml {
            let df = (n - p) as f64;
            (
                logdet_l + logdet_rx + df * (1.0 + LN_2PI + (r2 / df).ln()),
                r2 / df,
            )
        } else {
            let nf = n as f64;
            (logdet_l + nf * (1.0 + LN_2PI + (r2 / nf).ln()), r2 / nf)
        };

        let u = sol.rows(0, q).into_owned();
        let beta = sol.rows(q, p).into_owned();
        let b = &lambda * &u;

        // Var(β)/σ² from the trailing Cholesky block: Schur = L22 L22'
        let l22 = l.view((q, q), (p, p)).into_owned();
        let schur = &l22 * l22.transpose();
        let beta_cov_unscaled = invert_symmetric(&schur)?;

        Some(PlsSolution {
            deviance,
            beta: to_array1(&beta),
            u: to_array1(&u),
            b: to_array1(&b),
            r2,
            sigma2,
            beta_cov_unscaled: to_array2(&beta_cov_unscaled),
            logdet_l,
            logdet_rx,
        })
    }

    /// Profiled deviance at θ, for the optimizer.
    ///
    /// Out-of-bounds θ and failed factorizations return `f64::INFINITY`,
    /// which the derivative-free optimizers treat as "move away".
    pub fn evaluate_deviance(&self, theta: &[f64], reml: bool) -> f64 {
        match self.solve_inner(theta, reml) {
            Some(sol) => sol.deviance,
            None => f64::INFINITY,
        }
    }

    /// Full solution at θ.
    pub fn solve(&self, theta: &[f64], reml: bool) -> Result<PlsSolution> {
        self.solve_inner(theta, reml).ok_or_else(|| {
            MorphMixError::LinearAlgebra(format!(
                "penalized least-squares system is not positive definite at θ = {:?}; \
                 this often indicates collinear fixed effects",
                theta
            ))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ObservationTable;
    use crate::design::build_design;
    use crate::formula::parse_formula;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    /// Two groups, strong group separation in the intercept.
    fn grouped_design() -> ModelDesign {
        let labels = ["a", "a", "a", "b", "b", "b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut t = ObservationTable::new(labels).unwrap();
        t.push_column("x", Array1::from_vec(vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]))
            .unwrap();
        // y = 2x + 3 for group a, y = 2x - 3 for group b (exact, no noise)
        t.push_column("y", Array1::from_vec(vec![3.0, 5.0, 7.0, -3.0, -1.0, 1.0]))
            .unwrap();
        let formula = parse_formula("y ~ x + (1 | g)").unwrap();
        build_design(&t, &formula).unwrap()
    }

    /// Ordinary least squares via the normal equations, for reference.
    fn ols_beta(design: &ModelDesign) -> Array1<f64> {
        let x = to_dmatrix(&design.x);
        let y = to_dvector(&design.y);
        let xtx = x.transpose() * &x;
        let xty = x.transpose() * &y;
        to_array1(&xtx.cholesky().unwrap().solve(&xty))
    }

    #[test]
    fn test_theta_zero_reduces_to_ols() {
        let design = grouped_design();
        let cache = PlsCache::new(&design);
        let sol = cache.solve(&[0.0], false).unwrap();

        // At θ = 0 the random effects are pinned to zero and β is the OLS fit
        let beta_ols = ols_beta(&design);
        assert_abs_diff_eq!(sol.beta[0], beta_ols[0], epsilon = 1e-8);
        assert_abs_diff_eq!(sol.beta[1], beta_ols[1], epsilon = 1e-8);
        assert!(sol.u.iter().all(|&ui| ui.abs() < 1e-10));
        assert_abs_diff_eq!(sol.logdet_l, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_group_structure_lowers_deviance() {
        let design = grouped_design();
        let cache = PlsCache::new(&design);

        let d0 = cache.evaluate_deviance(&[0.0], false);
        let d1 = cache.evaluate_deviance(&[2.0], false);
        assert!(
            d1 < d0,
            "group-structured data should favor θ > 0 (d0 = {}, d1 = {})",
            d0,
            d1
        );
    }

    #[test]
    fn test_invalid_theta_is_infinite() {
        let design = grouped_design();
        let cache = PlsCache::new(&design);
        assert!(cache.evaluate_deviance(&[-0.5], false).is_infinite());
        assert!(cache.evaluate_deviance(&[1.0, 2.0], false).is_infinite());
    }

    #[test]
    fn test_random_effects_recover_group_offsets() {
        let design = grouped_design();
        let cache = PlsCache::new(&design);
        // Large θ ≈ no pooling: group intercept offsets approach ±3
        let sol = cache.solve(&[50.0], false).unwrap();
        assert!(sol.b[0] > 2.5, "group a offset ≈ +3, got {}", sol.b[0]);
        assert!(sol.b[1] < -2.5, "group b offset ≈ -3, got {}", sol.b[1]);
    }

    #[test]
    fn test_reml_and_ml_criteria_differ() {
        // Not a deep property, just pins the two criteria apart
        let design = grouped_design();
        let cache = PlsCache::new(&design);
        let ml = cache.solve(&[1.0], false).unwrap();
        let reml = cache.solve(&[1.0], true).unwrap();
        assert!(ml.deviance.is_finite() && reml.deviance.is_finite());
        assert!((ml.deviance - reml.deviance).abs() > 1e-8);
    }

    #[test]
    fn test_n_theta() {
        assert_eq!(n_theta(1), 1);
        assert_eq!(n_theta(2), 3);
    }
}
