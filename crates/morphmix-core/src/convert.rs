// =============================================================================
// ndarray ↔ nalgebra Conversion Utilities
// =============================================================================
//
// This module centralizes all conversions between ndarray (used for array
// storage in results and tables) and nalgebra (used for factorizations in
// the solver). Keeping them here avoids scattering element-by-element copy
// loops across the solver modules.
//
// =============================================================================

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

// =============================================================================
// ndarray → nalgebra
// =============================================================================

/// Convert an ndarray Array2 to a nalgebra DMatrix.
///
/// Handles non-contiguous arrays by making a contiguous copy first.
#[inline]
pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    let (nrows, ncols) = (a.nrows(), a.ncols());
    let contig = if a.is_standard_layout() {
        a.clone()
    } else {
        a.as_standard_layout().to_owned()
    };
    DMatrix::from_row_slice(nrows, ncols, contig.as_slice().unwrap())
}

/// Convert an ndarray Array1 to a nalgebra DVector.
#[inline]
pub fn to_dvector(v: &Array1<f64>) -> DVector<f64> {
    DVector::from_iterator(v.len(), v.iter().copied())
}

// =============================================================================
// nalgebra → ndarray
// =============================================================================

/// Convert a nalgebra DMatrix to an ndarray Array2.
#[inline]
pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    let (nrows, ncols) = m.shape();
    let mut result = Array2::zeros((nrows, ncols));
    for i in 0..nrows {
        for j in 0..ncols {
            result[[i, j]] = m[(i, j)];
        }
    }
    result
}

/// Convert a nalgebra DVector to an ndarray Array1.
#[inline]
pub fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    Array1::from_vec(v.as_slice().to_vec())
}

// =============================================================================
// Common linear algebra operations (ndarray in, ndarray out)
// =============================================================================

/// Solve a symmetric positive-definite system Ax = b.
///
/// Tries Cholesky first, falls back to LU decomposition.
/// Operates on ndarray types, handling conversion internally.
pub fn solve_symmetric(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let a_nalg = to_dmatrix(a);
    let b_nalg = to_dvector(b);

    if let Some(chol) = a_nalg.clone().cholesky() {
        Some(to_array1(&chol.solve(&b_nalg)))
    } else {
        a_nalg.lu().solve(&b_nalg).map(|x| to_array1(&x))
    }
}

/// Invert a square symmetric matrix, Cholesky first with LU fallback.
///
/// Returns None if the matrix is singular.
pub fn invert_symmetric(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let p = a.nrows();
    if let Some(chol) = a.clone().cholesky() {
        let identity = DMatrix::identity(p, p);
        Some(chol.solve(&identity))
    } else {
        a.clone().try_inverse()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_roundtrip_matrix() {
        let a = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let m = to_dmatrix(&a);
        let back = to_array2(&m);
        assert_eq!(a, back);
    }

    #[test]
    fn test_roundtrip_vector() {
        let v = array![1.0, 2.0, 3.0];
        let dv = to_dvector(&v);
        let back = to_array1(&dv);
        assert_eq!(v, back);
    }

    #[test]
    fn test_solve_symmetric_identity() {
        let a = Array2::eye(3);
        let b = array![1.0, 2.0, 3.0];
        let x = solve_symmetric(&a, &b).unwrap();
        for i in 0..3 {
            assert!((x[i] - b[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invert_symmetric() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = invert_symmetric(&a).unwrap();
        let prod = &a * &inv;
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod[(i, j)] - expected).abs() < 1e-10);
            }
        }
    }
}
