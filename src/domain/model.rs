use std::path::Path;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::domain::nonlin::NonlinearBank;
use crate::utils::error::{Result, VibError};
use crate::utils::linalg::{solve_complex, spectral_radius};

/// Discrete-time linear state-space model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpace {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
    pub dt: f64,
}

impl StateSpace {
    pub fn new(
        a: DMatrix<f64>,
        b: DMatrix<f64>,
        c: DMatrix<f64>,
        d: DMatrix<f64>,
        dt: f64,
    ) -> Result<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(VibError::shape("A must be square"));
        }
        if b.nrows() != n || c.ncols() != n {
            return Err(VibError::shape("B/C dimensions do not match the state count"));
        }
        if d.nrows() != c.nrows() || d.ncols() != b.ncols() {
            return Err(VibError::shape("D must be p x m"));
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(VibError::shape("sampling period must be positive"));
        }
        Ok(Self { a, b, c, d, dt })
    }

    pub fn n(&self) -> usize {
        self.a.nrows()
    }

    pub fn m(&self) -> usize {
        self.b.ncols()
    }

    pub fn p(&self) -> usize {
        self.c.nrows()
    }

    /// All poles strictly inside the unit circle.
    pub fn is_stable(&self) -> bool {
        spectral_radius(&self.a) < 1.0
    }

    /// Transfer matrix `G(z) = C (zI - A)^-1 B + D` at one point.
    pub fn transfer_at(&self, z: Complex64) -> Result<DMatrix<Complex64>> {
        transfer(&self.a, &self.b, &self.c, &self.d, z)
    }

    /// Frequency response at physical frequencies in Hz.
    pub fn frf(&self, freqs_hz: &[f64]) -> Result<Vec<DMatrix<Complex64>>> {
        freqs_hz
            .iter()
            .map(|&f| {
                let omega = 2.0 * std::f64::consts::PI * f * self.dt;
                self.transfer_at(Complex64::from_polar(1.0, omega))
            })
            .collect()
    }

    /// Time simulation from zero initial state.
    pub fn simulate(&self, u: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if u.ncols() != self.m() {
            return Err(VibError::shape("input channel count does not match B"));
        }
        let ns = u.nrows();
        let mut x = DVector::zeros(self.n());
        let mut y = DMatrix::zeros(ns, self.p());
        for t in 0..ns {
            let ut = u.row(t).transpose();
            let yt = &self.c * &x + &self.d * &ut;
            y.row_mut(t).copy_from(&yt.transpose());
            x = &self.a * &x + &self.b * &ut;
        }
        Ok(y)
    }
}

/// Grey-box nonlinear state-space model with state-equation nonlinearities:
///
/// ```text
/// x(t+1) = A x(t) + B u(t) + E g(y(t))
/// y(t)   = C x(t) + D u(t)
/// ```
///
/// The basis functions `g` live in a [`NonlinearBank`] supplied at call time;
/// the model itself only carries their coefficient matrix `E`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonlinearStateSpace {
    pub ss: StateSpace,
    pub e: DMatrix<f64>,
}

impl NonlinearStateSpace {
    pub fn new(ss: StateSpace, e: DMatrix<f64>) -> Result<Self> {
        if e.ncols() > 0 && e.nrows() != ss.n() {
            return Err(VibError::shape("E must have one row per state"));
        }
        Ok(Self { ss, e })
    }

    pub fn n_nl(&self) -> usize {
        self.e.ncols()
    }

    /// Nonlinear time simulation. With an empty bank this is exactly the
    /// linear simulation.
    pub fn simulate(&self, u: &DMatrix<f64>, bank: &NonlinearBank) -> Result<DMatrix<f64>> {
        if bank.len() != self.n_nl() {
            return Err(VibError::shape(format!(
                "bank has {} elements, model E has {} columns",
                bank.len(),
                self.n_nl()
            )));
        }
        if self.n_nl() == 0 {
            return self.ss.simulate(u);
        }
        if u.ncols() != self.ss.m() {
            return Err(VibError::shape("input channel count does not match B"));
        }

        let ns = u.nrows();
        let p = self.ss.p();
        let mut x = DVector::zeros(self.ss.n());
        let mut y = DMatrix::zeros(ns, p);
        let mut yrow = vec![0.0; p];
        for t in 0..ns {
            let ut = u.row(t).transpose();
            let yt = &self.ss.c * &x + &self.ss.d * &ut;
            for (j, v) in yrow.iter_mut().enumerate() {
                *v = yt[j];
            }
            let g = bank.eval_sample(&yrow);
            y.row_mut(t).copy_from(&yt.transpose());
            x = &self.ss.a * &x + &self.ss.b * &ut + &self.e * &g;
        }
        Ok(y)
    }

    /// Simulate a periodic excitation to steady state: `transient_periods`
    /// copies of the input are prepended and discarded.
    pub fn simulate_steady(
        &self,
        u_periodic: &DMatrix<f64>,
        bank: &NonlinearBank,
        transient_periods: usize,
    ) -> Result<DMatrix<f64>> {
        let ns = u_periodic.nrows();
        let total = ns * (transient_periods + 1);
        let mut u_full = DMatrix::zeros(total, u_periodic.ncols());
        for r in 0..=transient_periods {
            u_full.rows_mut(r * ns, ns).copy_from(u_periodic);
        }
        let y_full = self.simulate(&u_full, bank)?;
        Ok(y_full.rows(transient_periods * ns, ns).into_owned())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let model: Self = serde_json::from_reader(file)?;
        Ok(model)
    }
}

/// `C (zI - A)^-1 B + D` for arbitrary (extended) input matrices.
pub fn transfer(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    c: &DMatrix<f64>,
    d: &DMatrix<f64>,
    z: Complex64,
) -> Result<DMatrix<Complex64>> {
    let n = a.nrows();
    let mut pencil = DMatrix::<Complex64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            pencil[(i, j)] = Complex64::new(-a[(i, j)], 0.0);
        }
        pencil[(i, i)] += z;
    }
    let bc = b.map(|v| Complex64::new(v, 0.0));
    let x = solve_complex(&pencil, &bc)?;
    let cc = c.map(|v| Complex64::new(v, 0.0));
    let dc = d.map(|v| Complex64::new(v, 0.0));
    Ok(&cc * x + dc)
}
