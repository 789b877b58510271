//! Zero-peak calibration against a filtered companion histogram.
//!
//! Charge readout puts the pedestal at an arbitrary offset with an
//! electronics-noise width around it. The filtered companion (same channel
//! behind a pulse filter) is nearly pure noise, so its peak anchors a
//! re-centering walk of Gaussian fits on the raw spectrum.

use qc_core::{Error, Result};
use qc_hist::Histogram;
use qc_models::gaussian::par;

use crate::gaussfit::fit_gaussian;
use crate::optimizer::OptimizerConfig;

/// Knobs of the re-centering loop.
#[derive(Debug, Clone)]
pub struct CalibratorConfig {
    /// Maximum re-centered fits of the raw zero peak before falling back.
    pub max_refits: usize,
    /// Stop once the fitted mean moves less than this between fits.
    pub mean_tol: f64,
    pub optimizer: OptimizerConfig,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self { max_refits: 5, mean_tol: 1e-3, optimizer: OptimizerConfig::default() }
    }
}

/// Zero-peak calibration extracted from a raw/filtered histogram pair.
#[derive(Debug, Clone)]
pub struct NoiseCalibration {
    /// Charge position of the zero-photoelectron peak on the raw spectrum.
    pub offset: f64,
    /// Electronics noise width from the filtered histogram.
    pub noise_spread: f64,
    /// Zero-peak width on the raw histogram.
    pub raw_spread: f64,
    /// Zero-peak height on the raw histogram.
    pub scale: f64,
    /// Gaussian fits performed on the raw histogram.
    pub n_fits: usize,
    /// False when the averaged-center fallback ended the walk.
    pub converged: bool,
}

/// Walk the raw zero peak starting from the filtered-histogram anchor.
///
/// Each fit re-centers the next window on the fitted mean; the walk stops
/// when the mean settles within `mean_tol`. If it has not settled after
/// `max_refits` fits, one last fit runs at the average of the visited
/// centers, so the total number of raw fits never exceeds `max_refits + 1`.
pub fn calibrate(
    raw: &Histogram,
    filtered: &Histogram,
    config: &CalibratorConfig,
) -> Result<NoiseCalibration> {
    if config.max_refits == 0 {
        return Err(Error::Validation(
            "calibrator needs at least one raw refit".to_string(),
        ));
    }

    let anchor_window = (2.0 * filtered.std_dev()).max(2.0 * filtered.bin_width());
    let noise_fit = fit_gaussian(filtered, filtered.mean(), anchor_window, &config.optimizer)?;
    let mut center = noise_fit.parameters[par::MEAN];
    let noise_spread = noise_fit.parameters[par::SIGMA];

    let half_window = (15.0 * noise_spread).max(0.3);

    let mut means: Vec<f64> = Vec::with_capacity(config.max_refits);
    let mut last_fit = None;
    let mut converged = false;
    let mut n_fits = 0;

    for _ in 0..config.max_refits {
        let fit = fit_gaussian(raw, center, half_window, &config.optimizer)?;
        n_fits += 1;
        let mean = fit.parameters[par::MEAN];
        let step = means.last().map(|&previous| (mean - previous).abs());
        means.push(mean);
        last_fit = Some(fit);
        center = mean;
        if let Some(step) = step {
            if step < config.mean_tol {
                converged = true;
                break;
            }
        }
    }

    if !converged {
        // Averaging the visited centers keeps the last window inside the
        // explored neighborhood and ends the walk deterministically.
        let average = means.iter().sum::<f64>() / means.len() as f64;
        log::debug!(
            "zero-peak walk on '{}' did not settle after {} fits, refitting at {:.4}",
            raw.name,
            n_fits,
            average
        );
        let fit = fit_gaussian(raw, average, half_window, &config.optimizer)?;
        n_fits += 1;
        last_fit = Some(fit);
    }

    let fit = last_fit
        .ok_or_else(|| Error::Computation("zero-peak fit never ran".to_string()))?;

    Ok(NoiseCalibration {
        offset: fit.parameters[par::MEAN],
        noise_spread,
        raw_spread: fit.parameters[par::SIGMA],
        scale: fit.parameters[par::AMPLITUDE],
        n_fits,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qc_models::gaussian::peak_value;

    fn histogram(name: &str, peaks: &[(f64, f64, f64)]) -> Histogram {
        let n_bins = 400;
        let (x_min, x_max) = (-1.0, 3.0);
        let width = (x_max - x_min) / n_bins as f64;
        let counts: Vec<f64> = (0..n_bins)
            .map(|i| {
                let x = x_min + (i as f64 + 0.5) * width;
                peaks.iter().map(|&(h, m, s)| peak_value(x, h, m, s)).sum()
            })
            .collect();
        Histogram::new(name, x_min, x_max, counts).unwrap()
    }

    fn clean_pair() -> (Histogram, Histogram) {
        let raw = histogram("adc", &[(1000.0, 0.3, 0.35), (100.0, 1.5, 0.35)]);
        let filtered = histogram("f_adc", &[(500.0, 0.3, 0.02)]);
        (raw, filtered)
    }

    #[test]
    fn test_calibrates_clean_pair() {
        let (raw, filtered) = clean_pair();
        let cal = calibrate(&raw, &filtered, &CalibratorConfig::default()).unwrap();

        assert!(cal.converged);
        assert!(cal.n_fits <= 3, "clean data should settle fast, took {}", cal.n_fits);
        assert_relative_eq!(cal.offset, 0.3, epsilon = 0.01);
        assert_relative_eq!(cal.noise_spread, 0.02, max_relative = 0.05);
        assert_relative_eq!(cal.raw_spread, 0.35, max_relative = 0.05);
        assert_relative_eq!(cal.scale, 1000.0, max_relative = 0.05);
    }

    #[test]
    fn test_walk_recovers_from_shifted_anchor() {
        // Filtered peak sits away from the raw pedestal; the walk has to
        // travel to the true zero peak.
        let raw = histogram("adc", &[(1000.0, 0.3, 0.35)]);
        let filtered = histogram("f_adc", &[(500.0, 0.1, 0.02)]);
        let cal = calibrate(&raw, &filtered, &CalibratorConfig::default()).unwrap();

        assert!(cal.converged);
        assert_relative_eq!(cal.offset, 0.3, epsilon = 0.01);
    }

    #[test]
    fn test_zero_tolerance_forces_fallback() {
        let (raw, filtered) = clean_pair();
        let config = CalibratorConfig { mean_tol: 0.0, ..CalibratorConfig::default() };
        let cal = calibrate(&raw, &filtered, &config).unwrap();

        // No step ever beats a zero tolerance, so the walk exhausts its
        // budget and the averaged-center fallback runs exactly once.
        assert!(!cal.converged);
        assert_eq!(cal.n_fits, config.max_refits + 1);
        assert_relative_eq!(cal.offset, 0.3, epsilon = 0.01);
        assert!(cal.offset.is_finite() && cal.raw_spread.is_finite());
    }

    #[test]
    fn test_rejects_zero_refit_budget() {
        let (raw, filtered) = clean_pair();
        let config = CalibratorConfig { max_refits: 0, ..CalibratorConfig::default() };
        assert!(calibrate(&raw, &filtered, &config).is_err());
    }

    #[test]
    fn test_empty_filtered_histogram_is_an_error() {
        let raw = histogram("adc", &[(1000.0, 0.3, 0.35)]);
        let filtered = Histogram::new("f_adc", -1.0, 3.0, vec![0.0; 400]).unwrap();
        assert!(calibrate(&raw, &filtered, &CalibratorConfig::default()).is_err());
    }
}
