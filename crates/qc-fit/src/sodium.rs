//! Gamma-peak calibration for sodium-source runs.
//!
//! A 511 keV annihilation photopeak sits at the high-charge end of the
//! spectrum, above the Compton continuum and the pedestal. The search walks
//! the local maxima from the highest charge downward and accepts the first
//! candidate whose Gaussian fit is both valid and tall enough.

use std::cmp::Ordering;

use qc_core::{Error, FitResult, Result};
use qc_hist::{find_peaks, Histogram};
use qc_models::gaussian::par;

use crate::gaussfit::fit_gaussian;
use crate::optimizer::OptimizerConfig;

/// Gamma fits need a populated spectrum.
const MIN_ENTRIES: f64 = 1000.0;
/// Bins a candidate must dominate on each side.
const PEAK_WIDTH_BINS: usize = 2;
/// Calibrated operating point of the photodetector bias.
const NOMINAL_BIAS: f64 = 54.0;
/// Fit window and low-end noise band as fractions of the spectrum width.
const WINDOW_FRACTION: f64 = 0.2;
const NOISE_BAND_FRACTION: f64 = 0.01;
/// Acceptance cut: fitted amplitude must exceed entries over this.
const AMPLITUDE_DIVISOR: f64 = 150.0;

/// Peak-search height preset for the operating bias voltage.
///
/// At the nominal bias the photopeak competes with a tall Compton shoulder
/// and only prominent maxima are worth fitting; above nominal the gain
/// stretches the spectrum and the cut must sit much lower. Below nominal
/// there is no calibrated preset.
pub fn height_fraction_for_bias(bias_voltage: f64) -> Result<f64> {
    match bias_voltage.partial_cmp(&NOMINAL_BIAS) {
        Some(Ordering::Equal) => Ok(0.3),
        Some(Ordering::Greater) => Ok(0.05),
        _ => Err(Error::UnsupportedBiasVoltage(bias_voltage)),
    }
}

/// Accepted photopeak fit.
#[derive(Debug, Clone)]
pub struct GammaPeakFit {
    /// Gaussian fit at the accepted candidate.
    pub result: FitResult,
    /// Fitted peak position.
    pub position: f64,
    /// Standard error on the position.
    pub position_error: f64,
}

/// Find and fit the 511 keV photopeak.
///
/// Candidates are tried from the highest charge downward; the walk stops
/// once it reaches the noise band around the lowest candidate, so a
/// spectrum whose only maxima sit at the pedestal yields
/// [`Error::PeakNotFound`] rather than a pedestal position.
pub fn fit_gamma_peak(
    hist: &Histogram,
    height_fraction: f64,
    config: &OptimizerConfig,
) -> Result<GammaPeakFit> {
    if hist.entries <= MIN_ENTRIES {
        return Err(Error::InsufficientStatistics(format!(
            "'{}' has {:.0} entries, needs more than {:.0}",
            hist.name, hist.entries, MIN_ENTRIES
        )));
    }

    let peaks = find_peaks(hist, PEAK_WIDTH_BINS, height_fraction)?;
    if peaks.is_empty() {
        return Err(Error::PeakNotFound(format!(
            "no local maxima in '{}' above {:.0}% of the tallest",
            hist.name,
            100.0 * height_fraction
        )));
    }

    let sigma_h = hist.std_dev();
    let half_window = WINDOW_FRACTION * sigma_h;
    let noise_band = NOISE_BAND_FRACTION * sigma_h;
    let threshold = hist.entries / AMPLITUDE_DIVISOR;
    let lowest = peaks.positions[0];

    for &candidate in peaks.positions.iter().rev() {
        if candidate - lowest <= noise_band {
            // This close to the low end everything is pedestal; candidates
            // below only get closer.
            break;
        }
        let fit = match fit_gaussian(hist, candidate, half_window, config) {
            Ok(fit) => fit,
            Err(e) => {
                log::debug!(
                    "candidate at {candidate:.3} in '{}' failed to fit: {e}",
                    hist.name
                );
                continue;
            }
        };
        if !fit.is_valid {
            log::debug!(
                "candidate at {candidate:.3} in '{}' has no usable covariance",
                hist.name
            );
            continue;
        }
        let amplitude = fit.parameters[par::AMPLITUDE];
        if amplitude > threshold {
            let position = fit.parameters[par::MEAN];
            let position_error = fit.uncertainties[par::MEAN];
            log::debug!(
                "accepted photopeak for '{}' at {position:.3} (amplitude {amplitude:.0})",
                hist.name
            );
            return Ok(GammaPeakFit { result: fit, position, position_error });
        }
        log::debug!(
            "candidate at {candidate:.3} in '{}' rejected: amplitude {amplitude:.0} under {threshold:.0}",
            hist.name
        );
    }

    Err(Error::PeakNotFound(format!(
        "none of {} candidates in '{}' passed the amplitude cut",
        peaks.positions.len(),
        hist.name
    )))
}
