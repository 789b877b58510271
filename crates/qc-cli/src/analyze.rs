//! The `analyze` command: batch-fit every channel of a histogram file and
//! export one calibration row per channel.
//!
//! Channels fit in parallel; per-channel failures are logged and skipped so
//! one dark or misbehaving channel cannot sink the batch. Rows are written
//! sorted by channel name regardless of worker completion order.

use std::path::PathBuf;

use anyhow::Result;
use rayon::prelude::*;

use qc_core::{ChargeMeasurement, DataType, Error};
use qc_fit::{fit_gamma_peak, fit_probability, fit_spe, height_fraction_for_bias, SpeConfig};
use qc_hist::HistogramSet;
use qc_models::{PhotoelectronModel, PoissonCounting, VinogradovCounting};

/// One channel's outcome: the exported row plus the fit-quality numbers the
/// diagnostics table wants.
struct ChannelFit {
    measurement: ChargeMeasurement,
    chi2: f64,
    ndof: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_analyze(
    input: &PathBuf,
    output: &PathBuf,
    sodium: bool,
    bias_voltage: f64,
    vinogradov: bool,
    chi2_diagnostics: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    // Resolve the acceptance preset up front: an unsupported bias voltage
    // fails the whole invocation before any fitting starts.
    let height_fraction =
        if sodium { Some(height_fraction_for_bias(bias_voltage)?) } else { None };

    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    tracing::info!(path = %input.display(), "loading histograms");
    let set = HistogramSet::from_path(input)?;
    let names = set.primary_names();
    tracing::info!(channels = names.len(), sodium, vinogradov, "histograms loaded");

    let counting: &dyn PhotoelectronModel =
        if vinogradov { &VinogradovCounting } else { &PoissonCounting };
    let spe_config = SpeConfig::default();

    let outcomes: Vec<(&str, qc_core::Result<ChannelFit>)> = names
        .into_par_iter()
        .map(|name| {
            let fit = fit_channel(&set, name, height_fraction, counting, &spe_config);
            (name, fit)
        })
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (name, outcome) in outcomes {
        match outcome {
            Ok(fit) => {
                tracing::info!(
                    channel = name,
                    data_type = %fit.measurement.data_type,
                    charge = fit.measurement.charge,
                    charge_error = fit.measurement.charge_error,
                    "channel fitted"
                );
                rows.push(fit);
            }
            Err(err) => {
                skipped += 1;
                match &err {
                    // Expected for dark or short runs; not worth a warning.
                    Error::InsufficientStatistics(_) => {
                        tracing::info!(channel = name, error = %err, "channel skipped");
                    }
                    _ => {
                        tracing::warn!(channel = name, error = %err, "channel skipped");
                    }
                }
            }
        }
    }
    rows.sort_by(|a, b| a.measurement.channel.cmp(&b.measurement.channel));

    write_measurements(output, &rows)?;
    if let Some(path) = chi2_diagnostics {
        write_diagnostics(path, input, &rows)?;
    }

    tracing::info!(fitted = rows.len(), skipped, path = %output.display(), "analysis complete");
    Ok(())
}

fn fit_channel(
    set: &HistogramSet,
    name: &str,
    height_fraction: Option<f64>,
    counting: &dyn PhotoelectronModel,
    spe_config: &SpeConfig,
) -> qc_core::Result<ChannelFit> {
    let hist = set
        .get(name)
        .ok_or_else(|| Error::Validation(format!("histogram '{name}' not found")))?;

    match height_fraction {
        Some(fraction) => {
            let peak = fit_gamma_peak(hist, fraction, &spe_config.optimizer)?;
            Ok(ChannelFit {
                measurement: ChargeMeasurement {
                    data_type: DataType::Sodium,
                    channel: name.to_string(),
                    charge: peak.position,
                    charge_error: peak.position_error,
                },
                chi2: peak.result.chi2,
                ndof: peak.result.ndof,
            })
        }
        None => {
            let spe = fit_spe(hist, set.filtered_pair(name), counting, spe_config)?;
            Ok(ChannelFit {
                measurement: ChargeMeasurement {
                    data_type: DataType::Spe,
                    channel: name.to_string(),
                    charge: spe.spe_charge(),
                    charge_error: spe.spe_charge_error(),
                },
                chi2: spe.result.chi2,
                ndof: spe.result.ndof,
            })
        }
    }
}

fn write_measurements(path: &PathBuf, rows: &[ChannelFit]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["data_type", "channel", "charge", "charge_error"])?;
    for row in rows {
        let m = &row.measurement;
        wtr.write_record(&[
            m.data_type.to_string(),
            m.channel.clone(),
            format!("{:.6}", m.charge),
            format!("{:.6}", m.charge_error),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_diagnostics(path: &PathBuf, source: &PathBuf, rows: &[ChannelFit]) -> Result<()> {
    let source_file = source.display().to_string();
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["channel", "ndof", "chi2", "prob", "source_file"])?;
    for row in rows {
        let prob = fit_probability(row.chi2, row.ndof).unwrap_or(f64::NAN);
        wtr.write_record(&[
            row.measurement.channel.clone(),
            row.ndof.to_string(),
            format!("{:.6}", row.chi2),
            format!("{:.6}", prob),
            source_file.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
