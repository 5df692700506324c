use std::path::Path;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::utils::error::{Result, VibError};

/// Periodic input/output measurement of a vibrating structure.
///
/// The records hold `periods` repetitions of a periodic excitation with
/// `npp` samples per period, one column per channel. FNSI works on a single
/// realization, so there is no realization axis.
#[derive(Debug, Clone)]
pub struct Signal {
    u: DMatrix<f64>,
    y: DMatrix<f64>,
    npp: usize,
    periods: usize,
    fs: f64,
    lines: Vec<usize>,
}

impl Signal {
    pub fn new(
        u: DMatrix<f64>,
        y: DMatrix<f64>,
        npp: usize,
        periods: usize,
        fs: f64,
    ) -> Result<Self> {
        if npp == 0 || periods == 0 {
            return Err(VibError::shape("npp and periods must be positive"));
        }
        if u.nrows() != npp * periods || y.nrows() != npp * periods {
            return Err(VibError::shape(format!(
                "record length {} does not match npp * periods = {}",
                u.nrows(),
                npp * periods
            )));
        }
        if u.ncols() == 0 || y.ncols() == 0 {
            return Err(VibError::shape("at least one input and one output channel required"));
        }
        if !fs.is_finite() || fs <= 0.0 {
            return Err(VibError::shape("sampling rate must be positive"));
        }

        Ok(Self {
            u,
            y,
            npp,
            periods,
            fs,
            lines: Vec::new(),
        })
    }

    /// Load named channel columns from a headered CSV file.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        input_cols: &[String],
        output_cols: &[String],
        npp: usize,
        periods: usize,
        fs: f64,
    ) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();

        let find = |name: &String| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| VibError::InvalidConfigValueError {
                    field: "columns".to_string(),
                    value: name.clone(),
                    reason: "column not found in CSV header".to_string(),
                })
        };
        let u_idx: Vec<usize> = input_cols.iter().map(find).collect::<Result<_>>()?;
        let y_idx: Vec<usize> = output_cols.iter().map(find).collect::<Result<_>>()?;

        let mut u_rows: Vec<f64> = Vec::new();
        let mut y_rows: Vec<f64> = Vec::new();
        let mut nrows = 0usize;
        for record in reader.records() {
            let record = record?;
            let parse = |idx: usize| -> Result<f64> {
                record
                    .get(idx)
                    .unwrap_or("")
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| VibError::InvalidConfigValueError {
                        field: headers.get(idx).unwrap_or("?").to_string(),
                        value: record.get(idx).unwrap_or("").to_string(),
                        reason: format!("not a number: {}", e),
                    })
            };
            for &idx in &u_idx {
                u_rows.push(parse(idx)?);
            }
            for &idx in &y_idx {
                y_rows.push(parse(idx)?);
            }
            nrows += 1;
        }

        let u = DMatrix::from_row_slice(nrows, u_idx.len(), &u_rows);
        let y = DMatrix::from_row_slice(nrows, y_idx.len(), &y_rows);
        Signal::new(u, y, npp, periods, fs)
    }

    pub fn m(&self) -> usize {
        self.u.ncols()
    }

    pub fn p(&self) -> usize {
        self.y.ncols()
    }

    pub fn npp(&self) -> usize {
        self.npp
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.fs
    }

    pub fn u(&self) -> &DMatrix<f64> {
        &self.u
    }

    pub fn y(&self) -> &DMatrix<f64> {
        &self.y
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    /// Select the excited frequency bins. Bins at or above Nyquist are refused.
    pub fn set_lines(&mut self, lines: &[usize]) -> Result<()> {
        let nyquist = self.npp / 2;
        if let Some(&bad) = lines.iter().find(|&&l| l >= nyquist) {
            return Err(VibError::shape(format!(
                "line {} is at or above the Nyquist bin {}",
                bad, nyquist
            )));
        }
        self.lines = lines.to_vec();
        Ok(())
    }

    /// Per-sample mean over the periods, one period long.
    pub fn periodic_average(&self) -> (DMatrix<f64>, DMatrix<f64>) {
        let um = average_periods(&self.u, self.npp, self.periods);
        let ym = average_periods(&self.y, self.npp, self.periods);
        (um, ym)
    }

    /// FFT spectra of the averaged records.
    pub fn spectra(&self) -> (DMatrix<Complex64>, DMatrix<Complex64>) {
        let (um, ym) = self.periodic_average();
        (fft_columns(&um), fft_columns(&ym))
    }

    /// Sample variance of the output spectra across periods, averaged over the
    /// output channels: one value per frequency bin. The reciprocal is the
    /// usual weighting for the estimators.
    pub fn period_variance(&self) -> Result<DVector<f64>> {
        if self.periods < 2 {
            return Err(VibError::estimation(
                "period variance needs at least two periods",
            ));
        }

        let p = self.p();
        let mut spectra = Vec::with_capacity(self.periods);
        for r in 0..self.periods {
            let block = self.y.rows(r * self.npp, self.npp).into_owned();
            spectra.push(fft_columns(&block));
        }

        let mut var = DVector::zeros(self.npp);
        for k in 0..self.npp {
            let mut acc = 0.0;
            for j in 0..p {
                let mean: Complex64 = spectra.iter().map(|s| s[(k, j)]).sum::<Complex64>()
                    / (self.periods as f64);
                let ss: f64 = spectra
                    .iter()
                    .map(|s| (s[(k, j)] - mean).norm_sqr())
                    .sum();
                acc += ss / ((self.periods - 1) as f64);
            }
            var[k] = acc / (p as f64);
        }
        Ok(var)
    }
}

fn average_periods(x: &DMatrix<f64>, npp: usize, periods: usize) -> DMatrix<f64> {
    let mut mean = DMatrix::zeros(npp, x.ncols());
    for r in 0..periods {
        mean += x.rows(r * npp, npp);
    }
    mean / (periods as f64)
}

/// Column-wise forward FFT of a real matrix.
pub fn fft_columns(x: &DMatrix<f64>) -> DMatrix<Complex64> {
    let n = x.nrows();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);

    let mut out = DMatrix::<Complex64>::zeros(n, x.ncols());
    let mut buffer: Vec<Complex64> = Vec::with_capacity(n);
    for j in 0..x.ncols() {
        buffer.clear();
        buffer.extend(x.column(j).iter().map(|&v| Complex64::new(v, 0.0)));
        fft.process(&mut buffer);
        for i in 0..n {
            out[(i, j)] = buffer[i];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sine_signal(npp: usize, periods: usize, line: usize) -> Signal {
        let ntot = npp * periods;
        let u = DMatrix::from_fn(ntot, 1, |i, _| {
            (2.0 * PI * (line as f64) * (i as f64) / (npp as f64)).sin()
        });
        let y = u.clone() * 0.5;
        Signal::new(u, y, npp, periods, npp as f64).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let u = DMatrix::zeros(10, 1);
        let y = DMatrix::zeros(10, 1);
        assert!(Signal::new(u, y, 4, 2, 100.0).is_err());
    }

    #[test]
    fn test_periodic_average_is_period() {
        let sig = sine_signal(64, 4, 3);
        let (um, ym) = sig.periodic_average();
        assert_eq!(um.nrows(), 64);
        assert_eq!(ym.nrows(), 64);
        // perfectly periodic: average equals the first period
        for i in 0..64 {
            assert_relative_eq!(um[(i, 0)], sig.u()[(i, 0)], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spectrum_peak_at_excited_line() {
        let sig = sine_signal(64, 2, 5);
        let (uspec, _) = sig.spectra();
        let mags: Vec<f64> = (0..32).map(|k| uspec[(k, 0)].norm()).collect();
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak, 5);
    }

    #[test]
    fn test_set_lines_rejects_nyquist() {
        let mut sig = sine_signal(64, 2, 5);
        assert!(sig.set_lines(&[1, 2, 3]).is_ok());
        assert!(sig.set_lines(&[40]).is_err());
    }

    #[test]
    fn test_period_variance_zero_for_periodic_data() {
        let sig = sine_signal(64, 4, 3);
        let var = sig.period_variance().unwrap();
        assert!(var.max() < 1e-18);
    }

    #[test]
    fn test_period_variance_needs_two_periods() {
        let sig = sine_signal(64, 1, 3);
        assert!(sig.period_variance().is_err());
    }

    #[test]
    fn test_from_csv() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meas.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "force,disp,vel").unwrap();
        for i in 0..8 {
            writeln!(f, "{},{},{}", i, i * 2, i * 3).unwrap();
        }
        let sig = Signal::from_csv(
            &path,
            &["force".to_string()],
            &["disp".to_string(), "vel".to_string()],
            4,
            2,
            100.0,
        )
        .unwrap();
        assert_eq!(sig.m(), 1);
        assert_eq!(sig.p(), 2);
        assert_relative_eq!(sig.y()[(3, 1)], 9.0);
    }

    #[test]
    fn test_from_csv_missing_column() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meas.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "force,disp").unwrap();
        writeln!(f, "1.0,2.0").unwrap();
        let err = Signal::from_csv(
            &path,
            &["force".to_string()],
            &["acc".to_string()],
            1,
            1,
            100.0,
        );
        assert!(err.is_err());
    }
}
