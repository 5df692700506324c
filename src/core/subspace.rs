use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::domain::model::StateSpace;
use crate::utils::error::{Result, VibError};
use crate::utils::linalg::{lstsq, realify_cols, realify_rows, spectral_radius};

/// How the input matrices are recovered once `A` and `C` are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BdMethod {
    /// Joint linear least squares over `B` and `D`.
    #[default]
    Explicit,
    /// Force `D = 0` and solve for `B` only.
    NoFeedthrough,
}

#[derive(Default)]
pub struct SubspaceOptions {
    pub bd_method: BdMethod,
    /// Per-line weights (typically inverse noise variance); applied as
    /// `sqrt(w)` scalings of the frequency-domain equations.
    pub weight: Option<DVector<f64>>,
}

pub struct SubspaceResult {
    pub ss: StateSpace,
    /// Singular values of the projected data matrix, for order selection.
    pub singular_values: DVector<f64>,
    pub stable: bool,
}

/// Frequency-domain subspace identification.
///
/// Estimates a discrete-time state-space model of order `n` from input and
/// output spectra at F excited lines with normalized frequencies
/// `freq` in `[0, 0.5)`. `r` is the number of block rows of the
/// block-Vandermonde data matrices and must exceed `n`.
pub fn subspace(
    u_spec: &DMatrix<Complex64>,
    y_spec: &DMatrix<Complex64>,
    freq: &[f64],
    n: usize,
    r: usize,
    dt: f64,
    opts: &SubspaceOptions,
) -> Result<SubspaceResult> {
    let nf = freq.len();
    let m = u_spec.ncols();
    let p = y_spec.ncols();

    if u_spec.nrows() != nf || y_spec.nrows() != nf {
        return Err(VibError::shape(
            "spectra must have one row per frequency line",
        ));
    }
    if n == 0 {
        return Err(VibError::estimation("model order must be positive"));
    }
    if r <= n {
        return Err(VibError::estimation(format!(
            "block rows r = {} must exceed the model order n = {}",
            r, n
        )));
    }
    if n > r * p {
        return Err(VibError::estimation(format!(
            "order n = {} exceeds r * p = {}",
            n,
            r * p
        )));
    }
    if 2 * nf < r * (m + p) {
        return Err(VibError::estimation(format!(
            "{} excited lines are too few for r = {} with {} channels",
            nf,
            r,
            m + p
        )));
    }
    let sqrt_w = match &opts.weight {
        Some(w) => {
            if w.len() != nf {
                return Err(VibError::shape("weight length must match the line count"));
            }
            w.map(f64::sqrt)
        }
        None => DVector::from_element(nf, 1.0),
    };

    // Block-Vandermonde data matrices, one column per line.
    let mut wu = DMatrix::<Complex64>::zeros(r * m, nf);
    let mut wy = DMatrix::<Complex64>::zeros(r * p, nf);
    for k in 0..nf {
        let z = Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * freq[k]);
        let mut zi = Complex64::new(sqrt_w[k], 0.0);
        for i in 0..r {
            for q in 0..m {
                wu[(i * m + q, k)] = zi * u_spec[(k, q)];
            }
            for q in 0..p {
                wy[(i * p + q, k)] = zi * y_spec[(k, q)];
            }
            zi *= z;
        }
    }

    // Realify and remove the input influence by an LQ factorization.
    let ur = realify_cols(&wu);
    let yr = realify_cols(&wy);
    let mut stacked = DMatrix::zeros(r * (m + p), 2 * nf);
    stacked.rows_mut(0, r * m).copy_from(&ur);
    stacked.rows_mut(r * m, r * p).copy_from(&yr);

    let rfac = stacked.transpose().qr().r();
    let l = rfac.transpose();
    let l22 = l.view((r * m, r * m), (r * p, r * p)).into_owned();

    let svd = l22.svd(true, false);
    let sv = svd.singular_values.clone();
    let u_mat = svd
        .u
        .ok_or_else(|| VibError::linalg("SVD of the projected data matrix failed"))?;

    if sv[n - 1] <= sv[0] * 1e-14 {
        tracing::warn!(
            "singular value {} of {} is numerically zero; order {} is likely too high",
            n,
            sv.len(),
            n
        );
    }

    // Extended observability range, balanced by sqrt of the singular values.
    let mut or = u_mat.columns(0, n).into_owned();
    for j in 0..n {
        let scale = sv[j].max(0.0).sqrt();
        or.column_mut(j).scale_mut(scale);
    }

    let c = or.rows(0, p).into_owned();
    let a = lstsq(
        &or.rows(0, (r - 1) * p).into_owned(),
        &or.rows(p, (r - 1) * p).into_owned(),
    )?;

    let stable = spectral_radius(&a) < 1.0;
    if !stable {
        tracing::debug!("estimated A has poles outside the unit circle");
    }

    let (b, d) = estimate_bd(&a, &c, u_spec, y_spec, freq, &sqrt_w, opts.bd_method)?;

    let ss = StateSpace::new(a, b, c, d, dt)?;
    Ok(SubspaceResult {
        ss,
        singular_values: sv,
        stable,
    })
}

/// Explicit least-squares estimate of B (and optionally D) given A and C:
/// `Y_k = (U_k^T kron C(z_k I - A)^-1) vec(B) + (U_k^T kron I_p) vec(D)`.
fn estimate_bd(
    a: &DMatrix<f64>,
    c: &DMatrix<f64>,
    u_spec: &DMatrix<Complex64>,
    y_spec: &DMatrix<Complex64>,
    freq: &[f64],
    sqrt_w: &DVector<f64>,
    method: BdMethod,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let nf = freq.len();
    let n = a.nrows();
    let m = u_spec.ncols();
    let p = c.nrows();

    let with_d = method == BdMethod::Explicit;
    let n_theta = n * m + if with_d { p * m } else { 0 };

    let ac = a.map(|v| Complex64::new(v, 0.0));
    let cc = c.map(|v| Complex64::new(v, 0.0));
    let eye_n = DMatrix::<Complex64>::identity(n, n);

    let mut phi = DMatrix::<Complex64>::zeros(nf * p, n_theta);
    let mut rhs = DMatrix::<Complex64>::zeros(nf * p, 1);

    for k in 0..nf {
        let z = Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * freq[k]);
        let pencil = &eye_n * z - &ac;
        let resolvent = pencil
            .lu()
            .solve(&eye_n)
            .ok_or_else(|| VibError::linalg("singular pencil zI - A"))?;
        let ck = &cc * resolvent; // p x n

        let w = Complex64::new(sqrt_w[k], 0.0);
        for i in 0..p {
            let row = k * p + i;
            rhs[(row, 0)] = w * y_spec[(k, i)];
            for q in 0..m {
                let uq = w * u_spec[(k, q)];
                for j in 0..n {
                    phi[(row, q * n + j)] = uq * ck[(i, j)];
                }
                if with_d {
                    phi[(row, n * m + q * p + i)] = uq;
                }
            }
        }
    }

    let theta = lstsq(&realify_rows(&phi), &realify_rows(&rhs))?;

    let b = DMatrix::from_fn(n, m, |i, j| theta[(j * n + i, 0)]);
    let d = if with_d {
        DMatrix::from_fn(p, m, |i, j| theta[(n * m + j * p + i, 0)])
    } else {
        DMatrix::zeros(p, m)
    };
    Ok((b, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn true_system() -> StateSpace {
        let a = DMatrix::from_row_slice(2, 2, &[1.5, -0.7, 1.0, 0.0]);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 0.5]);
        let c = DMatrix::from_row_slice(1, 2, &[0.2, 0.1]);
        let d = DMatrix::from_row_slice(1, 1, &[0.05]);
        StateSpace::new(a, b, c, d, 1.0).unwrap()
    }

    fn spectra_of(
        ss: &StateSpace,
        freq: &[f64],
    ) -> (DMatrix<Complex64>, DMatrix<Complex64>) {
        let m = ss.m();
        let p = ss.p();
        let nf = freq.len();
        let mut u = DMatrix::<Complex64>::zeros(nf, m);
        let mut y = DMatrix::<Complex64>::zeros(nf, p);
        for (k, &f) in freq.iter().enumerate() {
            let z = Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * f);
            let g = ss.transfer_at(z).unwrap();
            for q in 0..m {
                // deterministic, line-dependent excitation
                u[(k, q)] = Complex64::new(
                    1.0 + (0.7 * k as f64 + q as f64).cos(),
                    (0.3 * k as f64).sin(),
                );
            }
            let urow = u.row(k).transpose();
            let yk = &g * urow;
            for i in 0..p {
                y[(k, i)] = yk[i];
            }
        }
        (u, y)
    }

    fn assert_frf_close(est: &StateSpace, truth: &StateSpace, tol: f64) {
        for &f in &[0.02, 0.07, 0.13, 0.21, 0.33, 0.45] {
            let z = Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * f);
            let ge = est.transfer_at(z).unwrap();
            let gt = truth.transfer_at(z).unwrap();
            for i in 0..gt.nrows() {
                for j in 0..gt.ncols() {
                    assert!(
                        (ge[(i, j)] - gt[(i, j)]).norm() < tol,
                        "FRF mismatch at f = {}: {} vs {}",
                        f,
                        ge[(i, j)],
                        gt[(i, j)]
                    );
                }
            }
        }
    }

    #[test]
    fn test_recovers_siso_system_from_exact_spectra() {
        let ss = true_system();
        let freq: Vec<f64> = (2..60).map(|k| k as f64 / 128.0).collect();
        let (u, y) = spectra_of(&ss, &freq);

        let res = subspace(&u, &y, &freq, 2, 6, 1.0, &SubspaceOptions::default()).unwrap();
        assert!(res.stable);
        assert_frf_close(&res.ss, &ss, 1e-7);

        // poles must match too
        let mut le: Vec<f64> = res.ss.a.complex_eigenvalues().iter().map(|l| l.norm()).collect();
        let mut lt: Vec<f64> = ss.a.complex_eigenvalues().iter().map(|l| l.norm()).collect();
        le.sort_by(|a, b| a.partial_cmp(b).unwrap());
        lt.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (e, t) in le.iter().zip(&lt) {
            assert_relative_eq!(*e, *t, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_recovers_two_output_system() {
        let a = DMatrix::from_row_slice(2, 2, &[1.4, -0.58, 1.0, 0.0]);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        let c = DMatrix::from_row_slice(2, 2, &[0.3, 0.0, 0.1, 0.2]);
        let d = DMatrix::zeros(2, 1);
        let ss = StateSpace::new(a, b, c, d, 1.0).unwrap();

        let freq: Vec<f64> = (3..50).map(|k| k as f64 / 120.0).collect();
        let (u, y) = spectra_of(&ss, &freq);
        let res = subspace(&u, &y, &freq, 2, 5, 1.0, &SubspaceOptions::default()).unwrap();
        assert_frf_close(&res.ss, &ss, 1e-7);
    }

    #[test]
    fn test_no_feedthrough_variant() {
        let mut ss = true_system();
        ss.d[(0, 0)] = 0.0;
        let freq: Vec<f64> = (2..60).map(|k| k as f64 / 128.0).collect();
        let (u, y) = spectra_of(&ss, &freq);

        let opts = SubspaceOptions {
            bd_method: BdMethod::NoFeedthrough,
            weight: None,
        };
        let res = subspace(&u, &y, &freq, 2, 6, 1.0, &opts).unwrap();
        assert_relative_eq!(res.ss.d[(0, 0)], 0.0);
        assert_frf_close(&res.ss, &ss, 1e-7);
    }

    #[test]
    fn test_uniform_weight_changes_nothing() {
        let ss = true_system();
        let freq: Vec<f64> = (2..60).map(|k| k as f64 / 128.0).collect();
        let (u, y) = spectra_of(&ss, &freq);

        let plain = subspace(&u, &y, &freq, 2, 6, 1.0, &SubspaceOptions::default()).unwrap();
        let opts = SubspaceOptions {
            bd_method: BdMethod::Explicit,
            weight: Some(DVector::from_element(freq.len(), 1.0)),
        };
        let weighted = subspace(&u, &y, &freq, 2, 6, 1.0, &opts).unwrap();
        assert_frf_close(&weighted.ss, &plain.ss, 1e-9);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        let ss = true_system();
        let freq: Vec<f64> = (2..30).map(|k| k as f64 / 64.0).collect();
        let (u, y) = spectra_of(&ss, &freq);

        // r must exceed n
        assert!(subspace(&u, &y, &freq, 3, 3, 1.0, &SubspaceOptions::default()).is_err());
        // far too few lines
        let short: Vec<f64> = freq[..3].to_vec();
        let us = u.rows(0, 3).into_owned();
        let ys = y.rows(0, 3).into_owned();
        assert!(subspace(&us, &ys, &short, 2, 6, 1.0, &SubspaceOptions::default()).is_err());
    }

    #[test]
    fn test_singular_values_expose_order() {
        let ss = true_system();
        let freq: Vec<f64> = (2..60).map(|k| k as f64 / 128.0).collect();
        let (u, y) = spectra_of(&ss, &freq);
        let res = subspace(&u, &y, &freq, 2, 6, 1.0, &SubspaceOptions::default()).unwrap();
        // noise-free order-2 data: a sharp gap after the second singular value
        assert!(res.singular_values[1] / res.singular_values[0] > 1e-6);
        assert!(res.singular_values[2] / res.singular_values[1] < 1e-6);
    }
}
