use clap::Parser;

use crate::config::IdentConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "vibrs")]
#[command(about = "Frequency-domain subspace identification of nonlinear vibrating systems")]
pub struct CliConfig {
    /// Path to the identification job TOML file.
    pub config: String,

    #[arg(long, help = "Override the model order")]
    pub order: Option<usize>,

    #[arg(long, help = "Override the number of block rows")]
    pub block_rows: Option<usize>,

    #[arg(long, help = "Override the lower band edge in Hz")]
    pub fmin: Option<f64>,

    #[arg(long, help = "Override the upper band edge in Hz")]
    pub fmax: Option<f64>,

    #[arg(long, help = "Override the output directory")]
    pub output: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log per-stage resource usage")]
    pub monitor: bool,

    #[arg(long, help = "Emit JSON logs")]
    pub log_json: bool,
}

impl CliConfig {
    /// Fold the command-line overrides into a loaded job configuration.
    pub fn apply_overrides(&self, config: &mut IdentConfig) {
        if let Some(order) = self.order {
            config.estimation.order = order;
        }
        if let Some(block_rows) = self.block_rows {
            config.estimation.block_rows = block_rows;
        }
        if let Some(fmin) = self.fmin {
            config.estimation.fmin = Some(fmin);
        }
        if let Some(fmax) = self.fmax {
            config.estimation.fmax = Some(fmax);
        }
        if let Some(output) = &self.output {
            config.output.dir = output.clone();
        }
    }
}
