//! Small dense matrix helpers for the filters.
//!
//! Transpose, product, sum and matrix-vector products come straight
//! from `ndarray` (`.t()`, `.dot()`, operator overloads); this module
//! adds the inverses the filters need. Matrices stay tiny (2x2 for the
//! axis smoother, 7x7 for the EKF), so a closed form and a pivoted
//! Gauss-Jordan cover everything.

use ndarray::Array2;

/// Pivot magnitude below which an inverse is treated as singular.
pub const SINGULAR_EPS: f64 = 1e-12;

pub fn det_2x2(m: &Array2<f64>) -> f64 {
    m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]]
}

/// Closed-form 2x2 inverse. Falls back to the identity when the
/// determinant magnitude drops below [`SINGULAR_EPS`]; callers treat
/// that as a no-update step rather than an abort.
pub fn invert_2x2(m: &Array2<f64>) -> Array2<f64> {
    let det = det_2x2(m);
    if det.abs() < SINGULAR_EPS {
        return Array2::eye(2);
    }
    let mut inv = Array2::<f64>::zeros((2, 2));
    inv[[0, 0]] = m[[1, 1]] / det;
    inv[[0, 1]] = -m[[0, 1]] / det;
    inv[[1, 0]] = -m[[1, 0]] / det;
    inv[[1, 1]] = m[[0, 0]] / det;
    inv
}

/// Gauss-Jordan inverse with partial pivoting for square matrices up
/// to the EKF's 7x7. Same soft-fail contract as [`invert_2x2`]: a
/// pivot below [`SINGULAR_EPS`] yields the identity of the same size.
pub fn gauss_jordan_inverse(m: &Array2<f64>) -> Array2<f64> {
    let n = m.nrows();
    debug_assert_eq!(n, m.ncols());

    let mut a = m.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        // Partial pivot: largest magnitude at or below the diagonal
        let mut pivot_row = col;
        for row in col + 1..n {
            if a[[row, col]].abs() > a[[pivot_row, col]].abs() {
                pivot_row = row;
            }
        }
        let pivot = a[[pivot_row, col]];
        if pivot.abs() < SINGULAR_EPS {
            return Array2::eye(n);
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap([pivot_row, k], [col, k]);
                inv.swap([pivot_row, k], [col, k]);
            }
        }

        let scale = 1.0 / a[[col, col]];
        for k in 0..n {
            a[[col, k]] *= scale;
            inv[[col, k]] *= scale;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                let a_ck = a[[col, k]];
                let i_ck = inv[[col, k]];
                a[[row, k]] -= factor * a_ck;
                inv[[row, k]] -= factor * i_ck;
            }
        }
    }

    inv
}

/// Replace `m` with (m + m^T) / 2 to keep covariances symmetric after
/// repeated update steps.
pub fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for r in 0..n {
        for c in r + 1..n {
            let avg = 0.5 * (m[[r, c]] + m[[c, r]]);
            m[[r, c]] = avg;
            m[[c, r]] = avg;
        }
    }
}
