use clap::Parser;
use vibrs::utils::{logger, validation::Validate};
use vibrs::{CliConfig, IdentConfig, IdentWorkflow};

fn main() {
    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting vibrs");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let mut config = match IdentConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load job file {}: {}", cli.config, e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let monitor = if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
        Some(vibrs::utils::monitor::SystemMonitor::new(true))
    } else {
        None
    };

    let workflow = IdentWorkflow::new(config);
    match workflow.run() {
        Ok(report) => {
            if let Some(monitor) = &monitor {
                monitor.log_stage("identification");
            }
            tracing::info!("✅ Identification completed successfully!");
            println!("✅ Identification completed successfully!");
            println!(
                "📐 Model: order {}, {} inputs, {} outputs, {} nonlinear terms",
                report.model.ss.n(),
                report.model.ss.m(),
                report.model.ss.p(),
                report.model.n_nl()
            );
            for mode in &report.modes {
                println!(
                    "   mode: {:.3} Hz, {:.3} % damping",
                    mode.frequency_hz,
                    100.0 * mode.damping
                );
            }
            for (j, s) in report.knl_summary.iter().enumerate() {
                println!(
                    "   knl[{}]: {:.4e} (log10 |Re/Im| = {:.2})",
                    j, s.real_mean, s.log10_ratio
                );
            }
            for path in &report.artifacts {
                println!("📁 {}", path.display());
            }
        }
        Err(e) => {
            tracing::error!(
                "❌ Identification failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

            let exit_code = match e.severity() {
                vibrs::utils::error::ErrorSeverity::Low => 0,
                vibrs::utils::error::ErrorSeverity::Medium => 2,
                vibrs::utils::error::ErrorSeverity::High => 1,
                vibrs::utils::error::ErrorSeverity::Critical => 3,
            };
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }
}
