use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::utils::error::{Result, VibError};

/// Minimum-norm least-squares solve of `a x = b` through a truncated SVD.
pub fn lstsq(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if a.nrows() != b.nrows() {
        return Err(VibError::shape(format!(
            "lstsq: lhs has {} rows, rhs has {}",
            a.nrows(),
            b.nrows()
        )));
    }

    let svd = a.clone().svd(true, true);
    let smax = svd.singular_values.max();
    let eps = smax * f64::EPSILON * (a.nrows().max(a.ncols()) as f64);

    svd.solve(b, eps).map_err(VibError::linalg)
}

/// Solve `a x = b` with complex square `a` through an LU factorization.
pub fn solve_complex(
    a: &DMatrix<Complex64>,
    b: &DMatrix<Complex64>,
) -> Result<DMatrix<Complex64>> {
    a.clone()
        .lu()
        .solve(b)
        .ok_or_else(|| VibError::linalg("singular complex system"))
}

pub fn try_inverse(a: &DMatrix<f64>, what: &str) -> Result<DMatrix<f64>> {
    a.clone()
        .try_inverse()
        .ok_or_else(|| VibError::linalg(format!("{} is singular", what)))
}

/// Stack real and imaginary parts vertically: (2n x m) real from (n x m) complex.
pub fn realify_rows(x: &DMatrix<Complex64>) -> DMatrix<f64> {
    let (n, m) = x.shape();
    DMatrix::from_fn(2 * n, m, |i, j| {
        if i < n {
            x[(i, j)].re
        } else {
            x[(i - n, j)].im
        }
    })
}

/// Stack real and imaginary parts horizontally: (n x 2m) real from (n x m) complex.
pub fn realify_cols(x: &DMatrix<Complex64>) -> DMatrix<f64> {
    let (n, m) = x.shape();
    DMatrix::from_fn(n, 2 * m, |i, j| {
        if j < m {
            x[(i, j)].re
        } else {
            x[(i, j - m)].im
        }
    })
}

pub fn spectral_radius(a: &DMatrix<f64>) -> f64 {
    a.complex_eigenvalues()
        .iter()
        .map(|l| l.norm())
        .fold(0.0, f64::max)
}

/// Matrix exponential by scaling and squaring with a Taylor expansion.
pub fn expm(a: &DMatrix<f64>) -> DMatrix<f64> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());

    let norm = a.norm();
    let s = if norm > 0.5 {
        (norm / 0.5).log2().ceil() as u32
    } else {
        0
    };
    let scaled = a / 2f64.powi(s as i32);

    let mut result = DMatrix::identity(n, n);
    let mut term = DMatrix::identity(n, n);
    for k in 1..=40 {
        term = (&term * &scaled) / (k as f64);
        result += &term;
        if term.norm() < 1e-16 * result.norm() {
            break;
        }
    }

    for _ in 0..s {
        result = &result * &result;
    }
    result
}

/// Principal matrix square root by the Denman-Beavers iteration.
pub fn sqrtm(a: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(VibError::shape("sqrtm: matrix must be square"));
    }

    let mut y = a.clone();
    let mut z = DMatrix::identity(n, n);

    for _ in 0..60 {
        let y_inv = try_inverse(&y, "sqrtm iterate")?;
        let z_inv = try_inverse(&z, "sqrtm iterate")?;
        let y_next = (&y + z_inv) * 0.5;
        let z_next = (&z + y_inv) * 0.5;

        let delta = (&y_next - &y).norm();
        y = y_next;
        z = z_next;
        if delta < 1e-14 * y.norm().max(1.0) {
            return Ok(y);
        }
    }

    Err(VibError::linalg(
        "sqrtm did not converge; the matrix may have eigenvalues on the negative real axis",
    ))
}

/// Principal matrix logarithm by inverse scaling and squaring with a
/// Gregory series evaluation near the identity.
pub fn logm(a: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(VibError::shape("logm: matrix must be square"));
    }

    let identity = DMatrix::<f64>::identity(n, n);
    let mut x = a.clone();
    let mut k: u32 = 0;

    while (&x - &identity).norm() > 0.25 {
        if k >= 40 {
            return Err(VibError::linalg("logm did not contract towards identity"));
        }
        x = sqrtm(&x)?;
        k += 1;
    }

    // log(X) = 2 atanh(Z) with Z = (X - I)(X + I)^-1
    let zfac = (&x - &identity)
        * try_inverse(&(&x + &identity), "logm pencil")?;
    let z2 = &zfac * &zfac;

    let mut term = zfac.clone();
    let mut sum = zfac;
    for j in 1..60 {
        term = &term * &z2;
        let contrib = &term / (2 * j + 1) as f64;
        sum += &contrib;
        if contrib.norm() < 1e-16 * sum.norm().max(1.0) {
            break;
        }
    }

    Ok(sum * 2.0 * 2f64.powi(k as i32))
}
