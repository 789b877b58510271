//! Single-photoelectron charge extraction.
//!
//! Two-stage constrained fit of the photoelectron mixture to a low-light
//! charge spectrum. Stage one pins everything the zero-peak calibration
//! already measured and localizes the mean count and the SPE charge from
//! the peak comb; stage two releases the scale and the charge spread
//! inside narrow bands around the stage-one optimum.

use qc_core::{Error, FitResult, Result};
use qc_hist::Histogram;
use qc_models::poisson;
use qc_models::spectrum::{par, ChargeSpectrum, PhotoelectronModel};

use crate::calibrate::{calibrate, CalibratorConfig, NoiseCalibration};
use crate::chi2::{fit_curve, ParamState};
use crate::optimizer::OptimizerConfig;

/// Truncation bounds on the mixture length.
const MIN_PEAKS: u32 = 4;
const MAX_PEAKS: u32 = 20;
/// Counting-law quantile that sets the truncation.
const PEAK_QUANTILE: f64 = 0.95;
/// Hard ceiling on the SPE charge seed.
const SPE_CHARGE_CAP: f64 = 4.0;
/// Stage-two ceiling on the secondary-emission probability.
const SECONDARY_PROB_MAX: f64 = 0.25;

/// Zero-peak assumptions for channels without a filtered companion.
const DEFAULT_OFFSET: f64 = 0.0;
const DEFAULT_NOISE_SPREAD: f64 = 0.01;
const DEFAULT_RAW_SPREAD: f64 = 0.4;
const DEFAULT_SCALE_FRACTION: f64 = 0.075;

#[derive(Debug, Clone, Default)]
pub struct SpeConfig {
    pub optimizer: OptimizerConfig,
    pub calibrator: CalibratorConfig,
}

/// Everything the SPE schedule measured for one channel.
#[derive(Debug, Clone)]
pub struct SpeFit {
    /// Stage-two mixture fit.
    pub result: FitResult,
    /// Mixture truncation used for this channel.
    pub n_peaks: usize,
    /// Zero-peak calibration that seeded the fit.
    pub calibration: NoiseCalibration,
    /// Mean-count seed derived from the zero-peak fraction.
    pub seed_mean_count: f64,
    /// SPE charge seed from the first-moment balance.
    pub seed_spe_charge: f64,
}

impl SpeFit {
    /// Fitted SPE charge.
    pub fn spe_charge(&self) -> f64 {
        self.result.parameters[par::SPE_CHARGE]
    }

    /// Standard error on the SPE charge.
    pub fn spe_charge_error(&self) -> f64 {
        self.result.uncertainties[par::SPE_CHARGE]
    }
}

/// Extract the SPE charge from a low-light spectrum.
///
/// With a filtered companion the zero peak is calibrated by the
/// re-centering walk in [`calibrate`]; without one, conservative defaults
/// stand in. The truncation, the mean-count seed and the charge seed all
/// derive from the calibrated zero peak before any mixture fit runs.
pub fn fit_spe(
    hist: &Histogram,
    filtered: Option<&Histogram>,
    counting: &dyn PhotoelectronModel,
    config: &SpeConfig,
) -> Result<SpeFit> {
    if hist.entries <= 0.0 {
        return Err(Error::Computation(format!("'{}' has no entries", hist.name)));
    }

    let calibration = match filtered {
        Some(f) => calibrate(hist, f, &config.calibrator)?,
        None => {
            log::debug!(
                "no filtered companion for '{}', using default zero-peak values",
                hist.name
            );
            NoiseCalibration {
                offset: DEFAULT_OFFSET,
                noise_spread: DEFAULT_NOISE_SPREAD,
                raw_spread: DEFAULT_RAW_SPREAD,
                scale: DEFAULT_SCALE_FRACTION * hist.entries,
                n_fits: 0,
                converged: true,
            }
        }
    };

    let offset = calibration.offset;
    let zero_peak_end = offset + 2.0 * calibration.raw_spread;

    // The fraction of events left of the zero-peak end fixes the mean
    // count through P(0) of the counting law.
    let prob_zero =
        (hist.integral(hist.x_min, zero_peak_end) / hist.entries).clamp(1e-12, 1.0);
    let seed_mean_count = if prob_zero >= 1.0 { 0.0 } else { -prob_zero.ln() };

    let n_peaks =
        poisson::quantile(PEAK_QUANTILE, seed_mean_count)?.clamp(MIN_PEAKS, MAX_PEAKS) as usize;

    // First-moment balance for the charge seed. Both counting laws reduce
    // to plain Poisson at ps = 0, so the seed never depends on the law.
    let mut weight = 0.0;
    let mut first_moment = 0.0;
    for i in 0..n_peaks {
        let p = counting.prob(i as u32, seed_mean_count, 0.0)?;
        weight += p;
        first_moment += i as f64 * p;
    }

    let charge_floor = zero_peak_end - offset;
    if charge_floor >= SPE_CHARGE_CAP {
        return Err(Error::Computation(format!(
            "zero peak of '{}' is wider than the searchable charge range",
            hist.name
        )));
    }
    let seed_spe_charge = if first_moment > 0.0 {
        ((hist.mean() - offset * weight) / first_moment).clamp(charge_floor, SPE_CHARGE_CAP)
    } else {
        charge_floor
    };

    let sigma_h = hist.std_dev();
    let range = (offset - 1.5 * calibration.raw_spread, offset + 5.0 * sigma_h);

    let spectrum = ChargeSpectrum::new(counting, n_peaks);

    let init1 = [
        calibration.scale,
        offset,
        seed_mean_count,
        seed_spe_charge,
        calibration.raw_spread,
        0.0,
        0.0,
    ];
    let states1 = [
        ParamState::Fixed(calibration.scale),
        ParamState::Fixed(offset),
        ParamState::Bounded(0.0, f64::INFINITY),
        ParamState::Bounded(charge_floor, seed_spe_charge + 1.0),
        ParamState::Fixed(calibration.raw_spread),
        ParamState::Fixed(0.0),
        ParamState::Fixed(0.0),
    ];
    let stage1 = fit_curve(&spectrum, hist, range, &init1, &states1, &config.optimizer)?;

    let localized = &stage1.parameters;
    let mean_count = localized[par::MEAN_COUNT];
    let spe_charge = localized[par::SPE_CHARGE];
    log::debug!(
        "'{}': stage one localized mean_count={:.3} spe_charge={:.4} (chi2={:.1})",
        hist.name,
        mean_count,
        spe_charge,
        stage1.chi2
    );

    let states2 = [
        ParamState::Bounded(0.0, f64::INFINITY),
        ParamState::Fixed(offset),
        ParamState::Bounded((mean_count - 1.0).max(0.0), mean_count + 1.0),
        ParamState::Bounded((spe_charge - 1.0).max(charge_floor), spe_charge + 1.0),
        ParamState::Fixed(calibration.raw_spread),
        ParamState::Bounded(0.0, localized[par::SPE_CHARGE_SPREAD] + 0.1),
        if counting.has_secondary_emission() {
            ParamState::Bounded(0.0, SECONDARY_PROB_MAX)
        } else {
            ParamState::Fixed(0.0)
        },
    ];
    let result = fit_curve(&spectrum, hist, range, localized, &states2, &config.optimizer)?;

    if !result.is_valid {
        return Err(Error::FitDidNotConverge(format!(
            "spe mixture fit on '{}' (converged={}, chi2={:.1})",
            hist.name, result.converged, result.chi2
        )));
    }

    log::debug!(
        "'{}': spe_charge={:.4} +- {:.4} with {} peaks ({})",
        hist.name,
        result.parameters[par::SPE_CHARGE],
        result.uncertainties[par::SPE_CHARGE],
        n_peaks,
        counting.name()
    );

    Ok(SpeFit { result, n_peaks, calibration, seed_mean_count, seed_spe_charge })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_models::gaussian::peak_value;
    use qc_models::spectrum::PoissonCounting;

    fn flat_gaussian(name: &str, height: f64, mean: f64, sigma: f64) -> Histogram {
        let n_bins = 400;
        let (x_min, x_max) = (-10.0, 10.0);
        let width = (x_max - x_min) / n_bins as f64;
        let counts: Vec<f64> = (0..n_bins)
            .map(|i| peak_value(x_min + (i as f64 + 0.5) * width, height, mean, sigma))
            .collect();
        Histogram::new(name, x_min, x_max, counts).unwrap()
    }

    #[test]
    fn test_empty_histogram_is_rejected() {
        let hist = Histogram::new("dark", -0.5, 3.5, vec![0.0; 100]).unwrap();
        let err = fit_spe(&hist, None, &PoissonCounting, &SpeConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_zero_peak_wider_than_charge_cap_is_rejected() {
        // A very wide pedestal pushes the charge floor past the cap; there
        // is no room left for an SPE comb.
        let raw = flat_gaussian("adc", 1000.0, 0.0, 3.0);
        let filtered = flat_gaussian("f_adc", 500.0, 0.0, 0.5);
        let err = fit_spe(&raw, Some(&filtered), &PoissonCounting, &SpeConfig::default());
        match err {
            Err(Error::Computation(msg)) => {
                assert!(msg.contains("wider"), "unexpected message: {msg}")
            }
            other => panic!("expected a computation error, got {other:?}"),
        }
    }
}
