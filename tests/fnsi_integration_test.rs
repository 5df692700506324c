use nalgebra::DMatrix;

use vibrs::core::lti::cont2discrete;
use vibrs::domain::model::transfer;
use vibrs::{
    ConversionMethod, Fnsi, NonlinearBank, NonlinearStateSpace, Polynomial, Signal, StateSpace,
    SubspaceOptions,
};

const FS: f64 = 512.0;
const NPP: usize = 512;

/// Mass-normalized Duffing oscillator `y'' + 2 zeta wn y' + wn^2 y + mu y^3 = u`,
/// discretized jointly with its cubic-spring input column.
fn duffing_plant(mu: f64) -> NonlinearStateSpace {
    let f_n = 10.0;
    let zeta = 0.05;
    let wn = 2.0 * std::f64::consts::PI * f_n;

    let ac = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -wn * wn, -2.0 * zeta * wn]);
    let bc_ext = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, -mu]);
    let cc = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
    let dc_ext = DMatrix::zeros(1, 2);

    let dt = 1.0 / FS;
    let (ad, bd_ext, _, _) =
        cont2discrete(&ac, &bc_ext, &cc, &dc_ext, dt, ConversionMethod::Zoh).unwrap();

    let bd = bd_ext.columns(0, 1).into_owned();
    let ed = bd_ext.columns(1, 1).into_owned();
    let ss = StateSpace::new(ad, bd, cc, DMatrix::zeros(1, 1), dt).unwrap();
    NonlinearStateSpace::new(ss, ed).unwrap()
}

fn multisine(lines: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(NPP, 1, |i, _| {
        lines
            .iter()
            .enumerate()
            .map(|(idx, &l)| {
                let phase = (idx as f64) * 2.399963;
                (2.0 * std::f64::consts::PI * (l as f64) * (i as f64) / (NPP as f64) + phase)
                    .cos()
            })
            .sum()
    })
}

fn cubic_bank() -> NonlinearBank {
    let mut bank = NonlinearBank::new();
    bank.add(Box::new(Polynomial::new(3, vec![1.0]).unwrap()));
    bank
}

fn measure(plant: &NonlinearStateSpace, lines: &[usize], periods: usize) -> Signal {
    let u_period = multisine(lines);
    let y_period = plant.simulate_steady(&u_period, &cubic_bank(), 30).unwrap();

    let mut u = DMatrix::zeros(NPP * periods, 1);
    let mut y = DMatrix::zeros(NPP * periods, 1);
    for r in 0..periods {
        u.rows_mut(r * NPP, NPP).copy_from(&u_period);
        y.rows_mut(r * NPP, NPP).copy_from(&y_period);
    }
    let mut sig = Signal::new(u, y, NPP, periods, FS).unwrap();
    sig.set_lines(lines).unwrap();
    sig
}

#[test]
fn identifies_cubic_stiffness_coefficient() {
    let mu = 1e8;
    let plant = duffing_plant(mu);
    let lines: Vec<usize> = (2..40).collect();
    let sig = measure(&plant, &lines, 2);

    let mut fnsi = Fnsi::new(sig);
    fnsi.add_nl(Box::new(Polynomial::new(3, vec![1.0]).unwrap()));
    fnsi.estimate(2, 8, None, &SubspaceOptions::default())
        .unwrap();

    let coeff = fnsi.nl_coeff(0).unwrap();
    assert_eq!(coeff.knl.nrows(), 1);

    // the coefficient is real and flat over the excited band
    let mut re_min = f64::INFINITY;
    let mut re_max = f64::NEG_INFINITY;
    for k in 0..coeff.knl.ncols() {
        let knl = coeff.knl[(0, k)];
        assert!(
            knl.im.abs() < 0.02 * knl.re.abs(),
            "imaginary part too large at {} Hz: {}",
            coeff.freq_hz[k],
            knl
        );
        re_min = re_min.min(knl.re);
        re_max = re_max.max(knl.re);
    }
    assert!((re_max - re_min) / re_max.abs() < 0.05);

    let summary = Fnsi::knl_summary(&coeff);
    assert!(
        (summary[0].real_mean - mu).abs() < 0.05 * mu,
        "expected knl near {:.3e}, got {:.3e}",
        mu,
        summary[0].real_mean
    );
    assert!(summary[0].log10_ratio > 1.5);
}

#[test]
fn extended_transfer_matches_plant() {
    let plant = duffing_plant(5e7);
    let lines: Vec<usize> = (2..40).collect();
    let sig = measure(&plant, &lines, 2);

    let mut fnsi = Fnsi::new(sig);
    fnsi.add_nl(Box::new(Polynomial::new(3, vec![1.0]).unwrap()));
    let model = fnsi
        .estimate(2, 8, None, &SubspaceOptions::default())
        .unwrap()
        .clone();

    // the extended transfer from [u, g] to y is invariant under the state basis
    let mut b_true = DMatrix::zeros(2, 2);
    b_true.columns_mut(0, 1).copy_from(&plant.ss.b);
    b_true.columns_mut(1, 1).copy_from(&plant.e);
    let mut b_est = DMatrix::zeros(2, 2);
    b_est.columns_mut(0, 1).copy_from(&model.ss.b);
    b_est.columns_mut(1, 1).copy_from(&model.e);
    let d_zero = DMatrix::zeros(1, 2);

    for &line in &[3usize, 10, 25] {
        let z = num_complex::Complex64::from_polar(
            1.0,
            2.0 * std::f64::consts::PI * line as f64 / NPP as f64,
        );
        let ht = transfer(&plant.ss.a, &b_true, &plant.ss.c, &d_zero, z).unwrap();
        let he = transfer(&model.ss.a, &b_est, &model.ss.c, &d_zero, z).unwrap();
        for col in 0..2 {
            assert!(
                (ht[(0, col)] - he[(0, col)]).norm() < 1e-5 * ht[(0, col)].norm(),
                "extended transfer mismatch at line {}, column {}",
                line,
                col
            );
        }
    }
}

#[test]
fn linear_fit_degrades_without_the_nonlinear_regressor() {
    let plant = duffing_plant(1e8);
    let lines: Vec<usize> = (2..40).collect();
    let sig = measure(&plant, &lines, 2);

    // purely linear identification of nonlinear data
    let mut linear = Fnsi::new(sig);
    let model = linear
        .estimate(2, 8, None, &SubspaceOptions::default())
        .unwrap()
        .clone();

    // the FRF around the resonance is biased by the unmodeled cubic term
    let lin_ss = StateSpace::new(
        plant.ss.a.clone(),
        plant.ss.b.clone(),
        plant.ss.c.clone(),
        plant.ss.d.clone(),
        plant.ss.dt,
    )
    .unwrap();
    let mut worst = 0.0f64;
    for &f in &[8.0, 10.0, 12.0] {
        let gt = lin_ss.frf(&[f]).unwrap()[0][(0, 0)];
        let ge = model.ss.frf(&[f]).unwrap()[0][(0, 0)];
        worst = worst.max((gt - ge).norm() / gt.norm());
    }
    assert!(worst > 1e-4, "linear fit should not match, worst {}", worst);
}
