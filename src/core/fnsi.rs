use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::core::lti::{discrete2cont, ConversionMethod};
use crate::core::optimize::{levenberg_marquardt, OptimizeOptions};
use crate::core::subspace::{subspace, SubspaceOptions};
use crate::domain::model::{NonlinearStateSpace, StateSpace};
use crate::domain::nonlin::{NonlinearBank, NonlinearElement};
use crate::domain::signal::{fft_columns, Signal};
use crate::utils::error::{Result, VibError};
use crate::utils::linalg::solve_complex;

/// Continuous-time matrices of the identified extended model. `ec`/`fc` are
/// the blocks extracted from the negated nonlinear columns, as they come out
/// of the joint conversion.
pub struct ContinuousModel {
    pub ac: DMatrix<f64>,
    pub bc: DMatrix<f64>,
    pub cc: DMatrix<f64>,
    pub dc: DMatrix<f64>,
    pub ec: DMatrix<f64>,
    pub fc: DMatrix<f64>,
}

/// Frequency-dependent nonlinear coefficients and the linear FRF estimate.
pub struct NlCoeff {
    pub freq_hz: Vec<f64>,
    /// Linear FRF `G(w)`, one row per output dof.
    pub g: DMatrix<Complex64>,
    /// One row per nonlinear element, complex valued over the excited lines.
    pub knl: DMatrix<Complex64>,
}

#[derive(Debug, Clone, Copy)]
pub struct KnlSummary {
    pub real_mean: f64,
    pub imag_mean: f64,
    /// `log10(|Re/Im|)`: one unit is a factor of ten between the physical
    /// part and the spurious imaginary part.
    pub log10_ratio: f64,
}

/// Frequency-domain nonlinear subspace identification (FNSI).
///
/// Grey-box estimator for
///
/// ```text
/// x(t+1) = A x(t) + B u(t) + E g(y(t))
/// y(t)   = C x(t) + D u(t)
/// ```
///
/// with user-specified static nonlinear basis functions. The nonlinear
/// forces are concatenated with the input into the extended input
/// `e = [u, -g(y)]`, and the extended linear model is identified by
/// frequency-domain subspace estimation.
pub struct Fnsi {
    signal: Signal,
    bank: NonlinearBank,
    lines: Vec<usize>,
    freq_norm: Vec<f64>,
    scaling: Vec<f64>,
    e_spec: Option<DMatrix<Complex64>>,
    y_spec: Option<DMatrix<Complex64>>,
    model: Option<NonlinearStateSpace>,
    singular_values: Option<DVector<f64>>,
}

impl Fnsi {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            bank: NonlinearBank::new(),
            lines: Vec::new(),
            freq_norm: Vec::new(),
            scaling: Vec::new(),
            e_spec: None,
            y_spec: None,
            model: None,
            singular_values: None,
        }
    }

    pub fn add_nl(&mut self, element: Box<dyn NonlinearElement>) {
        self.bank.add(element);
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn bank(&self) -> &NonlinearBank {
        &self.bank
    }

    pub fn model(&self) -> Option<&NonlinearStateSpace> {
        self.model.as_ref()
    }

    pub fn singular_values(&self) -> Option<&DVector<f64>> {
        self.singular_values.as_ref()
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    /// Normalized frequencies of the excited lines, in cycles per sample.
    pub fn freq_norm(&self) -> &[f64] {
        &self.freq_norm
    }

    /// Excited lines in Hz, available after `ext_input`/`estimate`.
    pub fn freq_hz(&self) -> Vec<f64> {
        let fs = self.signal.fs();
        let npp = self.signal.npp() as f64;
        self.lines.iter().map(|&l| l as f64 * fs / npp).collect()
    }

    /// Build the extended input and output spectra.
    ///
    /// Each nonlinear regressor is scaled to the standard deviation of the
    /// first input channel before the FFT, which keeps the extended columns
    /// comparable in magnitude; the scaling is undone when `E` is extracted.
    /// With a band `(fmin, fmax)` in Hz the lines `floor(fmin/fs*npp)` to
    /// `ceil(fmax/fs*npp)` are used, otherwise the signal's excited lines.
    pub fn ext_input(
        &mut self,
        band: Option<(f64, f64)>,
    ) -> Result<(DMatrix<Complex64>, DMatrix<Complex64>)> {
        let npp = self.signal.npp();
        let fs = self.signal.fs();

        let lines: Vec<usize> = match band {
            Some((fmin, fmax)) => {
                if !(fmin >= 0.0 && fmax > fmin) {
                    return Err(VibError::estimation("invalid frequency band"));
                }
                let f1 = (fmin / fs * npp as f64).floor() as usize;
                let f2 = ((fmax / fs * npp as f64).ceil() as usize).min(npp / 2 - 1);
                (f1.max(1)..=f2).collect()
            }
            None => self.signal.lines().to_vec(),
        };
        if lines.is_empty() {
            return Err(VibError::estimation(
                "no excited lines: set them on the signal or give a band",
            ));
        }

        let (um, ym) = self.signal.periodic_average();
        let u_mean = fft_columns(&um);
        let y_mean = fft_columns(&ym);

        let m = self.signal.m();
        let n_nl = self.bank.len();

        let (ext, scaling) = if n_nl == 0 {
            (u_mean, Vec::new())
        } else {
            let mut fnl = self.bank.regressor_matrix(&ym)?;
            let u0_std = column_std(&um, 0);
            let mut scaling = Vec::with_capacity(n_nl);
            for j in 0..n_nl {
                let g_std = column_std(&fnl, j);
                if g_std <= 0.0 {
                    return Err(VibError::estimation(format!(
                        "nonlinear regressor {} is constant over the record",
                        j
                    )));
                }
                let s = u0_std / g_std;
                fnl.column_mut(j).scale_mut(s);
                scaling.push(s);
            }
            let fnl_spec = fft_columns(&fnl);
            let mut ext = DMatrix::<Complex64>::zeros(npp, m + n_nl);
            ext.columns_mut(0, m).copy_from(&u_mean);
            for j in 0..n_nl {
                for i in 0..npp {
                    ext[(i, m + j)] = -fnl_spec[(i, j)];
                }
            }
            (ext, scaling)
        };

        let norm = (npp as f64).sqrt();
        let nf = lines.len();
        let mut e_spec = DMatrix::<Complex64>::zeros(nf, ext.ncols());
        let mut y_spec = DMatrix::<Complex64>::zeros(nf, y_mean.ncols());
        for (k, &line) in lines.iter().enumerate() {
            for j in 0..ext.ncols() {
                e_spec[(k, j)] = ext[(line, j)] / norm;
            }
            for j in 0..y_mean.ncols() {
                y_spec[(k, j)] = y_mean[(line, j)] / norm;
            }
        }

        self.freq_norm = lines.iter().map(|&l| l as f64 / npp as f64).collect();
        self.lines = lines;
        self.scaling = scaling;
        Ok((e_spec, y_spec))
    }

    /// Identify the extended model of order `n` with `r` block rows, then
    /// split the extended input matrix into `B` and `E`.
    pub fn estimate(
        &mut self,
        n: usize,
        r: usize,
        band: Option<(f64, f64)>,
        opts: &SubspaceOptions,
    ) -> Result<&NonlinearStateSpace> {
        let (e_spec, y_spec) = self.ext_input(band)?;

        tracing::info!(
            "FNSI estimate: n = {}, r = {}, {} lines, {} nonlinear elements",
            n,
            r,
            self.lines.len(),
            self.bank.len()
        );

        let res = subspace(&e_spec, &y_spec, &self.freq_norm, n, r, self.signal.dt(), opts)?;
        if !res.stable {
            tracing::warn!("identified extended model is unstable");
        }

        let model = self.split_extended(&res.ss)?;
        self.singular_values = Some(res.singular_values);
        self.e_spec = Some(e_spec);
        self.y_spec = Some(y_spec);
        Ok(&*self.model.insert(model))
    }

    /// Levenberg-Marquardt refinement of the extended model against the
    /// cached spectra. Returns the cost history.
    pub fn optimize(&mut self, opts: &OptimizeOptions) -> Result<Vec<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| VibError::estimation("call estimate before optimize"))?;
        let e_spec = self
            .e_spec
            .as_ref()
            .ok_or_else(|| VibError::estimation("call estimate before optimize"))?;
        let y_spec = self
            .y_spec
            .as_ref()
            .ok_or_else(|| VibError::estimation("call estimate before optimize"))?;

        let ext = self.extended_ss(model)?;
        let out = levenberg_marquardt(&ext, e_spec, y_spec, &self.freq_norm, opts)?;
        if let (Some(first), Some(last)) = (out.cost_history.first(), out.cost_history.last()) {
            tracing::info!(
                "FNSI refine: cost {:.6e} -> {:.6e} in {} steps",
                first,
                last,
                out.cost_history.len() - 1
            );
        }

        self.model = Some(self.split_extended(&out.ss)?);
        Ok(out.cost_history)
    }

    /// Convert to continuous time. `B` and `E` (and the feedthrough blocks)
    /// are converted jointly as the extended input matrix.
    pub fn to_cont(&self, method: ConversionMethod) -> Result<ContinuousModel> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| VibError::estimation("call estimate before to_cont"))?;
        let ss = &model.ss;
        let (n, m, p) = (ss.n(), ss.m(), ss.p());
        let n_nl = model.n_nl();

        let mut b_ext = DMatrix::zeros(n, m + n_nl);
        b_ext.columns_mut(0, m).copy_from(&ss.b);
        for j in 0..n_nl {
            for i in 0..n {
                b_ext[(i, m + j)] = -model.e[(i, j)];
            }
        }
        // grey-box FNSI carries no output-equation nonlinearity
        let mut d_ext = DMatrix::zeros(p, m + n_nl);
        d_ext.columns_mut(0, m).copy_from(&ss.d);

        let (ac, bc_ext, cc, dc_ext) =
            discrete2cont(&ss.a, &b_ext, &ss.c, &d_ext, ss.dt, method)?;

        Ok(ContinuousModel {
            ac,
            bc: bc_ext.columns(0, m).into_owned(),
            ec: bc_ext.columns(m, n_nl).into_owned(),
            cc,
            dc: dc_ext.columns(0, m).into_owned(),
            fc: dc_ext.columns(m, n_nl).into_owned(),
        })
    }

    /// Extended FRF and frequency-dependent nonlinear coefficients.
    ///
    /// `iu` is the output dof where the force acts. The extended transfer
    /// matrix `He(w)` gets an appended row of zeros for ground connections;
    /// each coefficient is `knl_j(w) = He[iu, m+j] / He[0, 0]` and the linear
    /// FRF estimate is the first input column of `He`.
    pub fn nl_coeff(&self, iu: usize) -> Result<NlCoeff> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| VibError::estimation("call estimate before nl_coeff"))?;
        let p = model.ss.p();
        let m = model.ss.m();
        let n = model.ss.n();
        let n_nl = model.n_nl();
        if iu >= p {
            return Err(VibError::shape(format!(
                "force dof {} out of range for {} outputs",
                iu, p
            )));
        }

        let cont = self.to_cont(ConversionMethod::Zoh)?;
        // ec/fc already carry the extended-input sign from the joint
        // conversion, so the extended matrices are rebuilt as-is; with this
        // convention a hardening spring yields a positive coefficient
        let mut b_ext = DMatrix::zeros(n, m + n_nl);
        b_ext.columns_mut(0, m).copy_from(&cont.bc);
        b_ext.columns_mut(m, n_nl).copy_from(&cont.ec);
        let mut d_ext = DMatrix::zeros(p, m + n_nl);
        d_ext.columns_mut(0, m).copy_from(&cont.dc);
        d_ext.columns_mut(m, n_nl).copy_from(&cont.fc);

        let freq_hz = self.freq_hz();
        let nf = freq_hz.len();
        if nf == 0 {
            return Err(VibError::estimation("no excited lines cached"));
        }

        let cc = cont.cc.map(|v| Complex64::new(v, 0.0));
        let bc_ext = b_ext.map(|v| Complex64::new(v, 0.0));
        let dc_ext = d_ext.map(|v| Complex64::new(v, 0.0));

        let mut g = DMatrix::<Complex64>::zeros(p, nf);
        let mut knl = DMatrix::<Complex64>::zeros(n_nl, nf);

        for (k, &f) in freq_hz.iter().enumerate() {
            let s = Complex64::new(0.0, 2.0 * std::f64::consts::PI * f);
            let mut pencil = cont.ac.map(|v| Complex64::new(-v, 0.0));
            for i in 0..n {
                pencil[(i, i)] += s;
            }
            let x = solve_complex(&pencil, &bc_ext)?;
            let he = &cc * x + &dc_ext; // p x (m + n_nl); ground row is zero

            for dof in 0..p {
                g[(dof, k)] = he[(dof, 0)];
            }
            let denom = he[(0, 0)];
            for j in 0..n_nl {
                knl[(j, k)] = he[(iu, m + j)] / denom;
            }
        }

        Ok(NlCoeff { freq_hz, g, knl })
    }

    /// Per-coefficient summary of `knl`: a large `log10(|Re/Im|)` means the
    /// estimate is dominated by its physical (real) part.
    pub fn knl_summary(coeff: &NlCoeff) -> Vec<KnlSummary> {
        (0..coeff.knl.nrows())
            .map(|j| {
                let nf = coeff.knl.ncols() as f64;
                let real_mean = coeff.knl.row(j).iter().map(|c| c.re).sum::<f64>() / nf;
                let imag_mean = coeff.knl.row(j).iter().map(|c| c.im).sum::<f64>() / nf;
                let log10_ratio = if imag_mean == 0.0 {
                    f64::INFINITY
                } else {
                    (real_mean / imag_mean).abs().log10()
                };
                KnlSummary {
                    real_mean,
                    imag_mean,
                    log10_ratio,
                }
            })
            .collect()
    }

    /// Split the identified extended model: `B` keeps the physical inputs,
    /// the negated and scaled nonlinear columns become `E`.
    fn split_extended(&self, ext: &StateSpace) -> Result<NonlinearStateSpace> {
        let m = self.signal.m();
        let n_nl = self.bank.len();
        if ext.m() != m + n_nl {
            return Err(VibError::shape("extended model has unexpected input count"));
        }

        let n = ext.n();
        let b = ext.b.columns(0, m).into_owned();
        let d = ext.d.columns(0, m).into_owned();
        let mut e = DMatrix::zeros(n, n_nl);
        for j in 0..n_nl {
            for i in 0..n {
                e[(i, j)] = -self.scaling[j] * ext.b[(i, m + j)];
            }
        }

        let ss = StateSpace::new(ext.a.clone(), b, ext.c.clone(), d, ext.dt)?;
        NonlinearStateSpace::new(ss, e)
    }

    /// Rebuild the extended state space from the physical model, re-applying
    /// the regressor scalings.
    fn extended_ss(&self, model: &NonlinearStateSpace) -> Result<StateSpace> {
        let ss = &model.ss;
        let (n, m, p) = (ss.n(), ss.m(), ss.p());
        let n_nl = model.n_nl();

        let mut b_ext = DMatrix::zeros(n, m + n_nl);
        b_ext.columns_mut(0, m).copy_from(&ss.b);
        for j in 0..n_nl {
            for i in 0..n {
                b_ext[(i, m + j)] = -model.e[(i, j)] / self.scaling[j];
            }
        }
        let mut d_ext = DMatrix::zeros(p, m + n_nl);
        d_ext.columns_mut(0, m).copy_from(&ss.d);

        StateSpace::new(ss.a.clone(), b_ext, ss.c.clone(), d_ext, ss.dt)
    }
}

fn column_std(x: &DMatrix<f64>, j: usize) -> f64 {
    let n = x.nrows() as f64;
    let mean = x.column(j).sum() / n;
    let var = x.column(j).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_plant() -> StateSpace {
        let a = DMatrix::from_row_slice(2, 2, &[1.5, -0.7, 1.0, 0.0]);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
        let c = DMatrix::from_row_slice(1, 2, &[0.1, 0.05]);
        let d = DMatrix::zeros(1, 1);
        StateSpace::new(a, b, c, d, 1.0 / 512.0).unwrap()
    }

    fn multisine(npp: usize, lines: &[usize]) -> DMatrix<f64> {
        DMatrix::from_fn(npp, 1, |i, _| {
            lines
                .iter()
                .enumerate()
                .map(|(idx, &l)| {
                    let phase = (idx as f64) * 2.399963; // spread the crest factor
                    (2.0 * std::f64::consts::PI * (l as f64) * (i as f64) / (npp as f64)
                        + phase)
                        .cos()
                })
                .sum()
        })
    }

    fn steady_signal(ss: &StateSpace, lines: &[usize], periods: usize) -> Signal {
        let npp = 512;
        let u_period = multisine(npp, lines);
        let nlss = NonlinearStateSpace::new(ss.clone(), DMatrix::zeros(2, 0)).unwrap();
        let y_period = nlss
            .simulate_steady(&u_period, &NonlinearBank::new(), 60)
            .unwrap();

        let mut u = DMatrix::zeros(npp * periods, 1);
        let mut y = DMatrix::zeros(npp * periods, 1);
        for r in 0..periods {
            u.rows_mut(r * npp, npp).copy_from(&u_period);
            y.rows_mut(r * npp, npp).copy_from(&y_period);
        }
        let mut sig = Signal::new(u, y, npp, periods, 512.0).unwrap();
        sig.set_lines(lines).unwrap();
        sig
    }

    #[test]
    fn test_linear_identification_without_nonlinearities() {
        let ss = linear_plant();
        let lines: Vec<usize> = (2..80).collect();
        let sig = steady_signal(&ss, &lines, 2);

        let mut fnsi = Fnsi::new(sig);
        let model = fnsi
            .estimate(2, 6, None, &SubspaceOptions::default())
            .unwrap()
            .clone();

        assert_eq!(model.n_nl(), 0);
        // FRF of the identified model matches the plant on the excited band
        for &f in &[4.0, 20.0, 55.0] {
            let gt = ss.frf(&[f]).unwrap()[0][(0, 0)];
            let ge = model.ss.frf(&[f]).unwrap()[0][(0, 0)];
            assert!(
                (gt - ge).norm() < 1e-5 * gt.norm().max(1.0),
                "FRF mismatch at {} Hz",
                f
            );
        }

        let coeff = fnsi.nl_coeff(0).unwrap();
        assert_eq!(coeff.knl.nrows(), 0);
        assert_eq!(coeff.g.nrows(), 1);
    }

    #[test]
    fn test_ext_input_band_selection() {
        let ss = linear_plant();
        let lines: Vec<usize> = (2..80).collect();
        let sig = steady_signal(&ss, &lines, 2);

        let mut fnsi = Fnsi::new(sig);
        fnsi.ext_input(Some((10.0, 50.0))).unwrap();
        // fs = 512, npp = 512: one line per Hz
        assert_eq!(fnsi.lines().first(), Some(&10));
        assert_eq!(fnsi.lines().last(), Some(&50));
    }

    #[test]
    fn test_ext_input_requires_lines() {
        let ss = linear_plant();
        let lines: Vec<usize> = (2..80).collect();
        let mut sig = steady_signal(&ss, &lines, 2);
        sig.set_lines(&[]).unwrap();
        let mut fnsi = Fnsi::new(sig);
        assert!(fnsi.ext_input(None).is_err());
    }

    #[test]
    fn test_regressor_scaling_is_positive_and_undone() {
        use crate::domain::nonlin::Polynomial;

        let ss = linear_plant();
        let lines: Vec<usize> = (2..80).collect();
        let sig = steady_signal(&ss, &lines, 2);

        let mut fnsi = Fnsi::new(sig);
        fnsi.add_nl(Box::new(Polynomial::new(3, vec![1.0]).unwrap()));
        fnsi.ext_input(None).unwrap();
        assert_eq!(fnsi.scaling.len(), 1);
        assert!(fnsi.scaling[0] > 0.0);
    }

    #[test]
    fn test_estimate_before_nl_coeff_is_an_error() {
        let ss = linear_plant();
        let lines: Vec<usize> = (2..80).collect();
        let sig = steady_signal(&ss, &lines, 2);
        let fnsi = Fnsi::new(sig);
        assert!(fnsi.nl_coeff(0).is_err());
    }

    #[test]
    fn test_knl_summary_ratio() {
        let coeff = NlCoeff {
            freq_hz: vec![1.0, 2.0],
            g: DMatrix::zeros(1, 2),
            knl: DMatrix::from_row_slice(
                1,
                2,
                &[Complex64::new(100.0, 1.0), Complex64::new(102.0, -0.5)],
            ),
        };
        let summary = Fnsi::knl_summary(&coeff);
        assert_relative_eq!(summary[0].real_mean, 101.0);
        assert!(summary[0].log10_ratio > 2.0);
    }
}
