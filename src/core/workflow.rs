use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::DVector;

use crate::config::IdentConfig;
use crate::core::fnsi::{Fnsi, KnlSummary, NlCoeff};
use crate::core::modal::{
    modal_properties, singular_value_gaps, stabilization, Mode, StabilizationDiagram,
};
use crate::core::optimize::OptimizeOptions;
use crate::domain::model::NonlinearStateSpace;
use crate::domain::signal::Signal;
use crate::utils::error::{Result, VibError};
use crate::utils::validation::Validate;

/// Everything one identification run produces, plus the paths of the files
/// written to the output directory.
pub struct IdentReport {
    pub model: NonlinearStateSpace,
    pub singular_values: Vec<f64>,
    pub modes: Vec<Mode>,
    pub coeff: NlCoeff,
    pub knl_summary: Vec<KnlSummary>,
    pub cost_history: Vec<f64>,
    pub artifacts: Vec<PathBuf>,
}

/// Runs a configured identification job end to end: load the measurement,
/// estimate the extended model, optionally refine it, then write the model
/// and the derived quantities to the output directory.
pub struct IdentWorkflow {
    config: IdentConfig,
}

impl IdentWorkflow {
    pub fn new(config: IdentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IdentConfig {
        &self.config
    }

    pub fn run(&self) -> Result<IdentReport> {
        self.config.validate()?;
        let cfg = &self.config;
        tracing::info!("job '{}': loading {}", cfg.job.name, cfg.data.path);

        let mut signal = Signal::from_csv(
            &cfg.data.path,
            &cfg.data.input_columns,
            &cfg.data.output_columns,
            cfg.data.npp,
            cfg.data.periods,
            cfg.data.fs,
        )?;
        if let Some(lines) = &cfg.data.lines {
            signal.set_lines(lines)?;
        }
        tracing::info!(
            "loaded {} inputs, {} outputs, {} periods of {} samples",
            signal.m(),
            signal.p(),
            signal.periods(),
            signal.npp()
        );

        let mut fnsi = Fnsi::new(signal);
        for element in cfg.nonlin_bank()?.into_elements() {
            fnsi.add_nl(element);
        }

        let band = cfg.band();
        let (e_spec, y_spec) = fnsi.ext_input(band)?;

        let weight = if cfg.estimation.weighting.unwrap_or(false) {
            let var = fnsi.signal().period_variance()?;
            Some(DVector::from_iterator(
                fnsi.lines().len(),
                fnsi.lines()
                    .iter()
                    .map(|&l| 1.0 / var[l].max(f64::MIN_POSITIVE)),
            ))
        } else {
            None
        };

        let mut sub_opts = cfg.subspace_options();
        sub_opts.weight = weight.clone();

        let diagram = match &cfg.stabilization {
            Some(stab) if stab.enabled => {
                tracing::info!("stabilization over orders {:?}", stab.orders);
                Some(stabilization(
                    &e_spec,
                    &y_spec,
                    fnsi.freq_norm(),
                    &stab.orders,
                    cfg.estimation.block_rows,
                    fnsi.signal().dt(),
                    &sub_opts,
                    stab.tol_frequency.unwrap_or(0.01),
                    stab.tol_damping.unwrap_or(0.05),
                )?)
            }
            _ => None,
        };

        fnsi.estimate(
            cfg.estimation.order,
            cfg.estimation.block_rows,
            band,
            &sub_opts,
        )?;

        let cost_history = match &cfg.optimization {
            Some(opt) if opt.enabled => {
                let defaults = OptimizeOptions::default();
                let opts = OptimizeOptions {
                    lambda: opt.lambda.unwrap_or(defaults.lambda),
                    nmax: opt.max_iter.unwrap_or(defaults.nmax),
                    ftol: opt.ftol.unwrap_or(defaults.ftol),
                    xtol: opt.xtol.unwrap_or(defaults.xtol),
                    weight,
                };
                fnsi.optimize(&opts)?
            }
            _ => Vec::new(),
        };

        let model = fnsi
            .model()
            .cloned()
            .ok_or_else(|| VibError::estimation("no model after estimation"))?;
        let singular_values: Vec<f64> = fnsi
            .singular_values()
            .map(|sv| sv.iter().copied().collect())
            .unwrap_or_default();
        if let Some(sv) = fnsi.singular_values() {
            tracing::debug!("singular value gaps: {:?}", singular_value_gaps(sv));
        }

        let modes = modal_properties(&model.ss.a, model.ss.dt);
        for mode in &modes {
            tracing::info!(
                "mode: {:.3} Hz, {:.3} % damping",
                mode.frequency_hz,
                100.0 * mode.damping
            );
        }

        let coeff = fnsi.nl_coeff(cfg.output.force_dof.unwrap_or(0))?;
        let knl_summary = Fnsi::knl_summary(&coeff);
        for (j, s) in knl_summary.iter().enumerate() {
            tracing::info!(
                "knl[{}]: mean {:.4e} + {:.4e}i, log10 |Re/Im| = {:.2}",
                j,
                s.real_mean,
                s.imag_mean,
                s.log10_ratio
            );
        }

        let artifacts = self.write_artifacts(
            &model,
            &singular_values,
            &modes,
            &coeff,
            diagram.as_ref(),
        )?;

        Ok(IdentReport {
            model,
            singular_values,
            modes,
            coeff,
            knl_summary,
            cost_history,
            artifacts,
        })
    }

    fn write_artifacts(
        &self,
        model: &NonlinearStateSpace,
        singular_values: &[f64],
        modes: &[Mode],
        coeff: &NlCoeff,
        diagram: Option<&StabilizationDiagram>,
    ) -> Result<Vec<PathBuf>> {
        let out = &self.config.output;
        let dir = Path::new(&out.dir);
        fs::create_dir_all(dir)?;

        let mut artifacts = Vec::new();

        let model_path = dir.join(out.model_file.as_deref().unwrap_or("model.json"));
        model.save_json(&model_path)?;
        artifacts.push(model_path);

        if out.write_frf.unwrap_or(true) {
            artifacts.push(write_frf_csv(&dir.join("frf.csv"), coeff)?);
        }
        if out.write_knl.unwrap_or(true) && model.n_nl() > 0 {
            artifacts.push(write_knl_csv(&dir.join("knl.csv"), coeff)?);
        }
        if out.write_modes.unwrap_or(true) {
            artifacts.push(write_modes_csv(&dir.join("modes.csv"), modes)?);
        }
        if let Some(diagram) = diagram {
            artifacts.push(write_stabilization_csv(
                &dir.join("stabilization.csv"),
                diagram,
            )?);
        }
        if !singular_values.is_empty() {
            artifacts.push(write_singular_values_csv(
                &dir.join("singular_values.csv"),
                singular_values,
            )?);
        }

        for path in &artifacts {
            tracing::info!("wrote {}", path.display());
        }
        Ok(artifacts)
    }
}

fn write_frf_csv(path: &Path, coeff: &NlCoeff) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    let p = coeff.g.nrows();
    let mut header = vec!["freq_hz".to_string()];
    for dof in 0..p {
        header.push(format!("g{}_re", dof));
        header.push(format!("g{}_im", dof));
        header.push(format!("g{}_mag", dof));
    }
    writer.write_record(&header)?;
    for (k, f) in coeff.freq_hz.iter().enumerate() {
        let mut row = vec![format!("{:.8e}", f)];
        for dof in 0..p {
            let g = coeff.g[(dof, k)];
            row.push(format!("{:.8e}", g.re));
            row.push(format!("{:.8e}", g.im));
            row.push(format!("{:.8e}", g.norm()));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_knl_csv(path: &Path, coeff: &NlCoeff) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    let n_nl = coeff.knl.nrows();
    let mut header = vec!["freq_hz".to_string()];
    for j in 0..n_nl {
        header.push(format!("knl{}_re", j));
        header.push(format!("knl{}_im", j));
    }
    writer.write_record(&header)?;
    for (k, f) in coeff.freq_hz.iter().enumerate() {
        let mut row = vec![format!("{:.8e}", f)];
        for j in 0..n_nl {
            let knl = coeff.knl[(j, k)];
            row.push(format!("{:.8e}", knl.re));
            row.push(format!("{:.8e}", knl.im));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_modes_csv(path: &Path, modes: &[Mode]) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["frequency_hz", "damping"])?;
    for mode in modes {
        writer.write_record([
            format!("{:.8e}", mode.frequency_hz),
            format!("{:.8e}", mode.damping),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_stabilization_csv(path: &Path, diagram: &StabilizationDiagram) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "order",
        "frequency_hz",
        "damping",
        "stable_frequency",
        "stable_damping",
    ])?;
    for entry in &diagram.entries {
        writer.write_record([
            entry.order.to_string(),
            format!("{:.8e}", entry.mode.frequency_hz),
            format!("{:.8e}", entry.mode.damping),
            entry.stable_frequency.to_string(),
            entry.stable_damping.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

fn write_singular_values_csv(path: &Path, singular_values: &[f64]) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "value"])?;
    for (i, sv) in singular_values.iter().enumerate() {
        writer.write_record([i.to_string(), format!("{:.8e}", sv)])?;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_rejects_missing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = IdentConfig::from_toml(&format!(
            r#"
[job]
name = "missing-data"

[data]
path = "{}/nowhere.csv"
input_columns = ["force"]
output_columns = ["disp"]
npp = 64
periods = 2
fs = 64.0
lines = [2, 3, 4]

[estimation]
order = 2
block_rows = 6

[output]
dir = "{}"
"#,
            dir.path().display(),
            dir.path().display()
        ))
        .unwrap();

        let report = IdentWorkflow::new(cfg).run();
        assert!(report.is_err());
    }

    #[test]
    fn test_write_modes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modes.csv");
        let modes = vec![
            Mode {
                frequency_hz: 5.0,
                damping: 0.02,
            },
            Mode {
                frequency_hz: 12.5,
                damping: 0.01,
            },
        ];
        write_modes_csv(&path, &modes).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("frequency_hz,damping"));
        assert_eq!(lines.count(), 2);
    }
}
