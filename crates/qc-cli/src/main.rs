//! qcal CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod analyze;

#[derive(Parser)]
#[command(name = "qcal")]
#[command(about = "qcal - Photodetector charge calibration from charge histograms")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit every channel in a histogram file and export calibration values
    Analyze {
        /// Input histogram file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV file for the calibration table
        #[arg(short, long)]
        output: PathBuf,

        /// Fit the 511 keV sodium photopeak instead of the SPE spectrum
        #[arg(long)]
        sodium: bool,

        /// Bias voltage in volts; selects the photopeak acceptance preset
        #[arg(long, default_value = "54.0")]
        bias_voltage: f64,

        /// Model optically induced secondary pulses (Vinogradov counting law)
        #[arg(long)]
        vinogradov: bool,

        /// Also write a per-channel chi-square diagnostics CSV to this path
        #[arg(long)]
        chi2_diagnostics: Option<PathBuf>,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            sodium,
            bias_voltage,
            vinogradov,
            chi2_diagnostics,
            threads,
        } => analyze::cmd_analyze(
            &input,
            &output,
            sodium,
            bias_voltage,
            vinogradov,
            chi2_diagnostics.as_ref(),
            threads,
        ),
        Commands::Version => {
            println!("qcal {}", qc_core::VERSION);
            Ok(())
        }
    }
}
