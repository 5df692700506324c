use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::core::subspace::{subspace, SubspaceOptions};
use crate::utils::error::Result;

/// One identified vibration mode.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Mode {
    pub frequency_hz: f64,
    pub damping: f64,
}

/// Continuous-time modal parameters of a discrete-time `A`:
/// `s = ln(lambda) / dt`, `f = |s| / 2pi`, `zeta = -Re(s) / |s|`.
/// Complex conjugate pairs are reported once, sorted by frequency.
pub fn modal_properties(a: &DMatrix<f64>, dt: f64) -> Vec<Mode> {
    let mut modes: Vec<Mode> = a
        .complex_eigenvalues()
        .iter()
        .filter(|l| l.norm() > 1e-12 && l.im >= 0.0)
        .filter_map(|l| {
            let s: Complex64 = l.ln() / dt;
            let sn = s.norm();
            if sn < 1e-12 {
                None
            } else {
                Some(Mode {
                    frequency_hz: sn / (2.0 * std::f64::consts::PI),
                    damping: -s.re / sn,
                })
            }
        })
        .collect();
    modes.sort_by(|x, y| x.frequency_hz.total_cmp(&y.frequency_hz));
    modes
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StabilizedMode {
    pub order: usize,
    pub mode: Mode,
    /// Frequency matched the previous order within tolerance.
    pub stable_frequency: bool,
    /// Frequency and damping both matched the previous order.
    pub stable_damping: bool,
}

pub struct StabilizationDiagram {
    pub entries: Vec<StabilizedMode>,
    pub tol_frequency: f64,
    pub tol_damping: f64,
}

/// Stabilization-diagram data: the estimator is run over a range of model
/// orders and each mode is flagged stable when it reappears at the previous
/// order within relative tolerances.
#[allow(clippy::too_many_arguments)]
pub fn stabilization(
    u_spec: &DMatrix<Complex64>,
    y_spec: &DMatrix<Complex64>,
    freq: &[f64],
    orders: &[usize],
    r: usize,
    dt: f64,
    opts: &SubspaceOptions,
    tol_frequency: f64,
    tol_damping: f64,
) -> Result<StabilizationDiagram> {
    let mut sorted_orders = orders.to_vec();
    sorted_orders.sort_unstable();
    sorted_orders.dedup();

    let mut entries = Vec::new();
    let mut previous: Option<Vec<Mode>> = None;

    for &order in &sorted_orders {
        let modes = match subspace(u_spec, y_spec, freq, order, r, dt, opts) {
            Ok(res) => modal_properties(&res.ss.a, dt),
            Err(e) => {
                tracing::warn!("order {} skipped in stabilization: {}", order, e);
                continue;
            }
        };

        for mode in &modes {
            let (stable_frequency, stable_damping) = match &previous {
                None => (false, false),
                Some(prev) => match closest(prev, mode.frequency_hz) {
                    None => (false, false),
                    Some(pm) => {
                        let df = (mode.frequency_hz - pm.frequency_hz).abs();
                        let f_ok = df <= tol_frequency * pm.frequency_hz.max(f64::MIN_POSITIVE);
                        let dz = (mode.damping - pm.damping).abs();
                        let z_ok =
                            f_ok && dz <= tol_damping * pm.damping.abs().max(f64::MIN_POSITIVE);
                        (f_ok, z_ok)
                    }
                },
            };
            entries.push(StabilizedMode {
                order,
                mode: *mode,
                stable_frequency,
                stable_damping,
            });
        }
        previous = Some(modes);
    }

    Ok(StabilizationDiagram {
        entries,
        tol_frequency,
        tol_damping,
    })
}

fn closest(modes: &[Mode], frequency_hz: f64) -> Option<&Mode> {
    modes.iter().min_by(|a, b| {
        (a.frequency_hz - frequency_hz)
            .abs()
            .total_cmp(&(b.frequency_hz - frequency_hz).abs())
    })
}

/// Convenience for order selection: ratios of consecutive singular values.
pub fn singular_value_gaps(sv: &DVector<f64>) -> Vec<f64> {
    (1..sv.len())
        .map(|i| if sv[i - 1] > 0.0 { sv[i] / sv[i - 1] } else { 0.0 })
        .collect()
}
