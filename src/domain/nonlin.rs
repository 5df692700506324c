use nalgebra::{DMatrix, DVector};

use crate::utils::error::{Result, VibError};

/// A static, localized nonlinear basis function `g(w . y)` of the measured
/// outputs. The weight vector `w` picks (or combines) the output channels the
/// nonlinearity acts on, e.g. `w = [0, 1]` for a velocity-driven element when
/// `y = [y, ydot]`.
pub trait NonlinearElement: Send + Sync {
    fn name(&self) -> &'static str;

    /// Channel selection vector; its length must equal the output count.
    fn w(&self) -> &[f64];

    /// Evaluate on a single output sample (one row of `y`).
    fn eval(&self, y: &[f64]) -> f64;

    fn inner(&self, y: &[f64]) -> f64 {
        self.w().iter().zip(y).map(|(wi, yi)| wi * yi).sum()
    }
}

/// Polynomial stiffness/damping term `(w . y)^exponent`.
pub struct Polynomial {
    exponent: i32,
    w: Vec<f64>,
}

impl Polynomial {
    pub fn new(exponent: i32, w: Vec<f64>) -> Result<Self> {
        if exponent < 1 {
            return Err(VibError::ConfigError {
                message: format!("polynomial exponent must be >= 1, got {}", exponent),
            });
        }
        if w.is_empty() {
            return Err(VibError::ConfigError {
                message: "polynomial selection vector is empty".to_string(),
            });
        }
        Ok(Self { exponent, w })
    }
}

impl NonlinearElement for Polynomial {
    fn name(&self) -> &'static str {
        "polynomial"
    }

    fn w(&self) -> &[f64] {
        &self.w
    }

    fn eval(&self, y: &[f64]) -> f64 {
        self.inner(y).powi(self.exponent)
    }
}

/// Regularized Coulomb friction `tanh((w . y) / eps)`, typically driven by a
/// velocity channel. Smaller `eps` approaches the ideal sign function.
pub struct TanhDryFriction {
    eps: f64,
    w: Vec<f64>,
}

impl TanhDryFriction {
    pub fn new(eps: f64, w: Vec<f64>) -> Result<Self> {
        if !eps.is_finite() || eps <= 0.0 {
            return Err(VibError::ConfigError {
                message: format!("tanh regularization eps must be positive, got {}", eps),
            });
        }
        if w.is_empty() {
            return Err(VibError::ConfigError {
                message: "friction selection vector is empty".to_string(),
            });
        }
        Ok(Self { eps, w })
    }
}

impl NonlinearElement for TanhDryFriction {
    fn name(&self) -> &'static str {
        "tanh_dry_friction"
    }

    fn w(&self) -> &[f64] {
        &self.w
    }

    fn eval(&self, y: &[f64]) -> f64 {
        (self.inner(y) / self.eps).tanh()
    }
}

/// Ordered collection of nonlinear elements. The order fixes the column
/// layout of the extended input everywhere downstream.
#[derive(Default)]
pub struct NonlinearBank {
    elements: Vec<Box<dyn NonlinearElement>>,
}

impl NonlinearBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, element: Box<dyn NonlinearElement>) {
        self.elements.push(element);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Box<dyn NonlinearElement>] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Box<dyn NonlinearElement>> {
        self.elements
    }

    fn check_dims(&self, p: usize) -> Result<()> {
        for el in &self.elements {
            if el.w().len() != p {
                return Err(VibError::shape(format!(
                    "{} element expects {} output channels, data has {}",
                    el.name(),
                    el.w().len(),
                    p
                )));
            }
        }
        Ok(())
    }

    /// Evaluate every element on one output sample.
    pub fn eval_sample(&self, y: &[f64]) -> DVector<f64> {
        DVector::from_iterator(self.elements.len(), self.elements.iter().map(|e| e.eval(y)))
    }

    /// Regressor time series, one column per element: `g_j(y(t))`.
    pub fn regressor_matrix(&self, ym: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.check_dims(ym.ncols())?;
        let npp = ym.nrows();
        let mut out = DMatrix::zeros(npp, self.elements.len());
        let mut row = vec![0.0; ym.ncols()];
        for t in 0..npp {
            for (j, v) in row.iter_mut().enumerate() {
                *v = ym[(t, j)];
            }
            for (j, el) in self.elements.iter().enumerate() {
                out[(t, j)] = el.eval(&row);
            }
        }
        Ok(out)
    }
}
