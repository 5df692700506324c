use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::domain::model::StateSpace;
use crate::utils::error::{Result, VibError};
use crate::utils::linalg::lstsq;

pub struct OptimizeOptions {
    /// Initial Levenberg-Marquardt damping.
    pub lambda: f64,
    /// Maximum number of accepted iterations.
    pub nmax: usize,
    /// Relative cost decrease below which the search stops.
    pub ftol: f64,
    /// Relative step size below which the search stops.
    pub xtol: f64,
    /// Per-line weights, applied as `sqrt(w)` residual scalings.
    pub weight: Option<DVector<f64>>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            lambda: 100.0,
            nmax: 25,
            ftol: 1e-12,
            xtol: 1e-12,
            weight: None,
        }
    }
}

pub struct OptimizeOutcome {
    pub ss: StateSpace,
    /// Cost after the initial point and after every accepted step;
    /// non-increasing by construction.
    pub cost_history: Vec<f64>,
}

/// Levenberg-Marquardt refinement of a state-space model against measured
/// input/output spectra.
///
/// The residual is the weighted frequency-domain output error
/// `sqrt(w_k) (G(z_k) u_k - y_k)` with real and imaginary parts stacked, and
/// all entries of `A, B, C, D` are free parameters. The Jacobian is taken by
/// forward differences; with a few hundred lines and model orders in the
/// single digits this stays cheap.
pub fn levenberg_marquardt(
    initial: &StateSpace,
    u_spec: &DMatrix<Complex64>,
    y_spec: &DMatrix<Complex64>,
    freq: &[f64],
    opts: &OptimizeOptions,
) -> Result<OptimizeOutcome> {
    let nf = freq.len();
    if u_spec.nrows() != nf || y_spec.nrows() != nf {
        return Err(VibError::shape(
            "spectra must have one row per frequency line",
        ));
    }
    if u_spec.ncols() != initial.m() || y_spec.ncols() != initial.p() {
        return Err(VibError::shape("channel counts do not match the model"));
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

    let dims = (initial.n(), initial.m(), initial.p());
    let mut theta = pack(initial);
    let mut residual = residuals(&theta, dims, initial.dt, u_spec, y_spec, freq, &sqrt_w)?;
    let mut cost = 0.5 * residual.norm_squared();
    let mut lambda = opts.lambda;
    let mut history = vec![cost];

    tracing::debug!("LM start: cost = {:.6e}, {} parameters", cost, theta.len());

    'outer: for iter in 0..opts.nmax {
        let jac = jacobian(&theta, dims, initial.dt, u_spec, y_spec, freq, &sqrt_w, &residual)?;
        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &residual;

        loop {
            let mut damped = jtj.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let step = lstsq(&damped, &DMatrix::from_column_slice(jtr.len(), 1, jtr.as_slice()))?;
            let step = DVector::from_column_slice(step.as_slice());

            let candidate = &theta - &step;
            let cand_res =
                residuals(&candidate, dims, initial.dt, u_spec, y_spec, freq, &sqrt_w)?;
            let cand_cost = 0.5 * cand_res.norm_squared();

            if cand_cost < cost {
                let rel_drop = (cost - cand_cost) / cost.max(f64::MIN_POSITIVE);
                let rel_step = step.norm() / theta.norm().max(1.0);
                theta = candidate;
                residual = cand_res;
                cost = cand_cost;
                history.push(cost);
                lambda = (lambda / 10.0).max(1e-14);
                tracing::debug!(
                    "LM iter {}: cost = {:.6e}, lambda = {:.1e}",
                    iter + 1,
                    cost,
                    lambda
                );
                if rel_drop < opts.ftol || rel_step < opts.xtol {
                    break 'outer;
                }
                break;
            }

            lambda *= 10.0;
            if lambda > 1e14 {
                tracing::debug!("LM stalled at cost = {:.6e}", cost);
                break 'outer;
            }
        }
    }

    Ok(OptimizeOutcome {
        ss: unpack(&theta, dims, initial.dt),
        cost_history: history,
    })
}

fn pack(ss: &StateSpace) -> DVector<f64> {
    let mut v = Vec::with_capacity(
        ss.n() * ss.n() + ss.n() * ss.m() + ss.p() * ss.n() + ss.p() * ss.m(),
    );
    v.extend_from_slice(ss.a.as_slice());
    v.extend_from_slice(ss.b.as_slice());
    v.extend_from_slice(ss.c.as_slice());
    v.extend_from_slice(ss.d.as_slice());
    DVector::from_vec(v)
}

fn unpack(theta: &DVector<f64>, (n, m, p): (usize, usize, usize), dt: f64) -> StateSpace {
    let s = theta.as_slice();
    let mut at = 0;
    let a = DMatrix::from_column_slice(n, n, &s[at..at + n * n]);
    at += n * n;
    let b = DMatrix::from_column_slice(n, m, &s[at..at + n * m]);
    at += n * m;
    let c = DMatrix::from_column_slice(p, n, &s[at..at + p * n]);
    at += p * n;
    let d = DMatrix::from_column_slice(p, m, &s[at..at + p * m]);
    StateSpace { a, b, c, d, dt }
}

fn residuals(
    theta: &DVector<f64>,
    dims: (usize, usize, usize),
    dt: f64,
    u_spec: &DMatrix<Complex64>,
    y_spec: &DMatrix<Complex64>,
    freq: &[f64],
    sqrt_w: &DVector<f64>,
) -> Result<DVector<f64>> {
    let ss = unpack(theta, dims, dt);
    let nf = freq.len();
    let p = dims.2;
    let mut res = DVector::zeros(2 * nf * p);
    for k in 0..nf {
        let z = Complex64::from_polar(1.0, 2.0 * std::f64::consts::PI * freq[k]);
        let g = ss.transfer_at(z)?;
        let uk = u_spec.row(k).transpose();
        let yk = &g * uk;
        for i in 0..p {
            let err = sqrt_w[k] * (yk[i] - y_spec[(k, i)]);
            res[k * p + i] = err.re;
            res[nf * p + k * p + i] = err.im;
        }
    }
    Ok(res)
}

#[allow(clippy::too_many_arguments)]
fn jacobian(
    theta: &DVector<f64>,
    dims: (usize, usize, usize),
    dt: f64,
    u_spec: &DMatrix<Complex64>,
    y_spec: &DMatrix<Complex64>,
    freq: &[f64],
    sqrt_w: &DVector<f64>,
    base: &DVector<f64>,
) -> Result<DMatrix<f64>> {
    let nt = theta.len();
    let mut jac = DMatrix::zeros(base.len(), nt);
    for j in 0..nt {
        let h = 1e-7 * theta[j].abs().max(1e-3);
        let mut bumped = theta.clone();
        bumped[j] += h;
        let r = residuals(&bumped, dims, dt, u_spec, y_spec, freq, sqrt_w)?;
        let col = (r - base) / h;
        jac.column_mut(j).copy_from(&col);
    }
    Ok(jac)
}
