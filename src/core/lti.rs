use nalgebra::DMatrix;

use crate::utils::error::{Result, VibError};
use crate::utils::linalg::{expm, logm, try_inverse};

/// Discretization family: zero-order hold or the generalized bilinear
/// transform with weight `alpha` (0 = forward Euler, 1/2 = Tustin,
/// 1 = backward difference).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConversionMethod {
    Zoh,
    Bilinear,
    ForwardDiff,
    BackwardDiff,
    Gbt { alpha: f64 },
}

impl ConversionMethod {
    fn alpha(self) -> Result<Option<f64>> {
        match self {
            ConversionMethod::Zoh => Ok(None),
            ConversionMethod::Bilinear => Ok(Some(0.5)),
            ConversionMethod::ForwardDiff => Ok(Some(0.0)),
            ConversionMethod::BackwardDiff => Ok(Some(1.0)),
            ConversionMethod::Gbt { alpha } => {
                if (0.0..=1.0).contains(&alpha) {
                    Ok(Some(alpha))
                } else {
                    Err(VibError::ConfigError {
                        message: format!("gbt alpha must lie in [0, 1], got {}", alpha),
                    })
                }
            }
        }
    }
}

type Quad = (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>, DMatrix<f64>);

/// Recover a continuous-time model from a discrete-time one.
pub fn discrete2cont(
    ad: &DMatrix<f64>,
    bd: &DMatrix<f64>,
    cd: &DMatrix<f64>,
    dd: &DMatrix<f64>,
    dt: f64,
    method: ConversionMethod,
) -> Result<Quad> {
    check_dims(ad, bd, cd, dd, dt)?;
    let n = ad.nrows();
    let m = bd.ncols();

    match method.alpha()? {
        None => {
            // zoh inverts the block exponential [[Ad, Bd], [0, I]] = expm(dt [[A, B], [0, 0]])
            let mut block = DMatrix::zeros(n + m, n + m);
            block.view_mut((0, 0), (n, n)).copy_from(ad);
            block.view_mut((0, n), (n, m)).copy_from(bd);
            for i in 0..m {
                block[(n + i, n + i)] = 1.0;
            }
            let log = logm(&block)? / dt;
            let a = log.view((0, 0), (n, n)).into_owned();
            let b = log.view((0, n), (n, m)).into_owned();
            Ok((a, b, cd.clone(), dd.clone()))
        }
        Some(alpha) if alpha == 0.0 => {
            let identity = DMatrix::identity(n, n);
            let a = (ad - identity) / dt;
            let b = bd / dt;
            Ok((a, b, cd.clone(), dd.clone()))
        }
        Some(alpha) => {
            let identity = DMatrix::<f64>::identity(n, n);
            let x = try_inverse(&(ad * alpha + &identity * (1.0 - alpha)), "gbt pencil")?;
            let a = (&identity - &x) / (alpha * dt);
            let b = &x * bd / dt;
            let c = cd * &x;
            let d = dd - (&c * bd) * alpha;
            Ok((a, b, c, d))
        }
    }
}

/// Discretize a continuous-time model.
pub fn cont2discrete(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    c: &DMatrix<f64>,
    d: &DMatrix<f64>,
    dt: f64,
    method: ConversionMethod,
) -> Result<Quad> {
    check_dims(a, b, c, d, dt)?;
    let n = a.nrows();
    let m = b.ncols();

    match method.alpha()? {
        None => {
            let mut block = DMatrix::zeros(n + m, n + m);
            block.view_mut((0, 0), (n, n)).copy_from(&(a * dt));
            block.view_mut((0, n), (n, m)).copy_from(&(b * dt));
            let exp = expm(&block);
            let ad = exp.view((0, 0), (n, n)).into_owned();
            let bd = exp.view((0, n), (n, m)).into_owned();
            Ok((ad, bd, c.clone(), d.clone()))
        }
        Some(alpha) => {
            let identity = DMatrix::<f64>::identity(n, n);
            let ima_inv = try_inverse(&(&identity - a * (alpha * dt)), "gbt pencil")?;
            let ad = &ima_inv * (&identity + a * ((1.0 - alpha) * dt));
            let bd = &ima_inv * b * dt;
            let cd = c * &ima_inv;
            let dd = d + (c * &bd) * alpha;
            Ok((ad, bd, cd, dd))
        }
    }
}

fn check_dims(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    c: &DMatrix<f64>,
    d: &DMatrix<f64>,
    dt: f64,
) -> Result<()> {
    let n = a.nrows();
    if a.ncols() != n || b.nrows() != n || c.ncols() != n {
        return Err(VibError::shape("state dimensions are inconsistent"));
    }
    if d.nrows() != c.nrows() || d.ncols() != b.ncols() {
        return Err(VibError::shape("D must be p x m"));
    }
    if !dt.is_finite() || dt <= 0.0 {
        return Err(VibError::shape("sampling period must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn oscillator() -> Quad {
        // single mode: wn = 2*pi*5 rad/s, 2% damping, velocity feedthrough-free
        let wn = 2.0 * std::f64::consts::PI * 5.0;
        let zeta = 0.02;
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -wn * wn, -2.0 * zeta * wn]);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let c = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let d = DMatrix::from_row_slice(1, 1, &[0.1]);
        (a, b, c, d)
    }

    fn roundtrip(method: ConversionMethod) {
        let (a, b, c, d) = oscillator();
        let dt = 1.0 / 500.0;
        let (ad, bd, cd, dd) = cont2discrete(&a, &b, &c, &d, dt, method).unwrap();
        let (ar, br, cr, dr) = discrete2cont(&ad, &bd, &cd, &dd, dt, method).unwrap();
        assert_relative_eq!(ar, a, epsilon = 1e-7, max_relative = 1e-7);
        assert_relative_eq!(br, b, epsilon = 1e-7, max_relative = 1e-7);
        assert_relative_eq!(cr, c, epsilon = 1e-7, max_relative = 1e-7);
        assert_relative_eq!(dr, d, epsilon = 1e-7, max_relative = 1e-7);
    }

    #[test]
    fn test_roundtrip_zoh() {
        roundtrip(ConversionMethod::Zoh);
    }

    #[test]
    fn test_roundtrip_bilinear() {
        roundtrip(ConversionMethod::Bilinear);
    }

    #[test]
    fn test_roundtrip_forward_diff() {
        roundtrip(ConversionMethod::ForwardDiff);
    }

    #[test]
    fn test_roundtrip_backward_diff() {
        roundtrip(ConversionMethod::BackwardDiff);
    }

    #[test]
    fn test_roundtrip_gbt() {
        roundtrip(ConversionMethod::Gbt { alpha: 0.3 });
    }

    #[test]
    fn test_gbt_alpha_validated() {
        let (a, b, c, d) = oscillator();
        assert!(
            cont2discrete(&a, &b, &c, &d, 0.01, ConversionMethod::Gbt { alpha: 1.5 }).is_err()
        );
    }

    #[test]
    fn test_zoh_matches_pole_mapping() {
        // zoh maps continuous poles s to exp(s dt) exactly
        let (a, b, c, d) = oscillator();
        let dt = 1.0 / 500.0;
        let (ad, _, _, _) = cont2discrete(&a, &b, &c, &d, dt, ConversionMethod::Zoh).unwrap();
        let mut sc: Vec<_> = a
            .complex_eigenvalues()
            .iter()
            .map(|s| (*s * dt).exp())
            .collect();
        let mut zd: Vec<_> = ad.complex_eigenvalues().iter().copied().collect();
        sc.sort_by(|x, y| x.im.partial_cmp(&y.im).unwrap());
        zd.sort_by(|x, y| x.im.partial_cmp(&y.im).unwrap());
        for (s, z) in sc.iter().zip(&zd) {
            assert_relative_eq!(s.re, z.re, epsilon = 1e-9);
            assert_relative_eq!(s.im, z.im, epsilon = 1e-9);
        }
    }
}
