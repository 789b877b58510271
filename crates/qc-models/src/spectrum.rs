//! Photoelectron mixture spectrum: counting-law-weighted Gaussian charge
//! peaks.
//!
//! The observed charge density is
//!
//! `scale · Σ_{i<n_peaks} P(i; λ, ps) · exp(-(x - offset - i·q)² / 2σ_i²)`
//!
//! with `σ_i = sqrt(noise_spread² + i·spe_charge_spread²)`. The truncation
//! `n_peaks` is chosen per histogram by the SPE schedule and travels with
//! the curve instance; nothing here is process-global.

use qc_core::{CurveModel, Error, Result};

use crate::gaussian;
use crate::{poisson, vinogradov};

/// Parameter vector layout shared by both counting models.
pub mod par {
    pub const SCALE: usize = 0;
    pub const OFFSET: usize = 1;
    pub const MEAN_COUNT: usize = 2;
    pub const SPE_CHARGE: usize = 3;
    pub const NOISE_SPREAD: usize = 4;
    pub const SPE_CHARGE_SPREAD: usize = 5;
    pub const SECONDARY_PROB: usize = 6;
    pub const N_PARAMS: usize = 7;
}

/// Probability law for the number of photoelectrons in the integration
/// window. The fit schedules select one of the two implementations from
/// configuration and never branch on it themselves.
pub trait PhotoelectronModel: Send + Sync {
    /// P(n) for the given mean count and secondary-emission probability.
    fn prob(&self, n: u32, mean_count: f64, secondary_prob: f64) -> Result<f64>;

    /// Whether the secondary-emission probability is a live parameter for
    /// this law. When false, schedules pin it to zero.
    fn has_secondary_emission(&self) -> bool;

    /// Law name for logs.
    fn name(&self) -> &'static str;
}

/// Pure Poisson counting. Ignores the secondary-emission probability.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonCounting;

impl PhotoelectronModel for PoissonCounting {
    fn prob(&self, n: u32, mean_count: f64, _secondary_prob: f64) -> Result<f64> {
        poisson::pmf(n, mean_count)
    }

    fn has_secondary_emission(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "poisson"
    }
}

/// Vinogradov branching-Poisson counting.
#[derive(Debug, Clone, Copy, Default)]
pub struct VinogradovCounting;

impl PhotoelectronModel for VinogradovCounting {
    fn prob(&self, n: u32, mean_count: f64, secondary_prob: f64) -> Result<f64> {
        vinogradov::pmf(n, mean_count, secondary_prob)
    }

    fn has_secondary_emission(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "vinogradov"
    }
}

/// Truncated mixture spectrum over a fixed counting law.
pub struct ChargeSpectrum<'a> {
    counting: &'a dyn PhotoelectronModel,
    n_peaks: usize,
}

impl<'a> ChargeSpectrum<'a> {
    /// Build a spectrum curve with the truncation chosen for one histogram.
    pub fn new(counting: &'a dyn PhotoelectronModel, n_peaks: usize) -> Self {
        Self { counting, n_peaks }
    }

    pub fn n_peaks(&self) -> usize {
        self.n_peaks
    }
}

impl CurveModel for ChargeSpectrum<'_> {
    fn n_parameters(&self) -> usize {
        par::N_PARAMS
    }

    fn parameter_names(&self) -> Vec<String> {
        vec![
            "scale".into(),
            "offset".into(),
            "mean_count".into(),
            "spe_charge".into(),
            "noise_spread".into(),
            "spe_charge_spread".into(),
            "secondary_prob".into(),
        ]
    }

    fn eval(&self, x: f64, params: &[f64]) -> Result<f64> {
        if params.len() != par::N_PARAMS {
            return Err(Error::Validation(format!(
                "spectrum takes {} parameters, got {}",
                par::N_PARAMS,
                params.len()
            )));
        }
        let scale = params[par::SCALE];
        let offset = params[par::OFFSET];
        let spe_charge = params[par::SPE_CHARGE];
        let noise_var = params[par::NOISE_SPREAD] * params[par::NOISE_SPREAD];
        let spread_var = params[par::SPE_CHARGE_SPREAD] * params[par::SPE_CHARGE_SPREAD];
        // The counting laws reject negative parameters, and finite-difference
        // gradients step a hair below an active bound at zero.
        let mean_count = params[par::MEAN_COUNT].max(0.0);
        let secondary_prob = params[par::SECONDARY_PROB].max(0.0);

        let mut density = 0.0;
        for i in 0..self.n_peaks {
            let prob = self.counting.prob(i as u32, mean_count, secondary_prob)?;
            let sigma = (noise_var + i as f64 * spread_var).sqrt().max(1e-12);
            density +=
                prob * gaussian::peak_value(x, 1.0, offset + i as f64 * spe_charge, sigma);
        }
        Ok(scale * density)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PARAMS: [f64; 7] = [1000.0, 0.1, 0.5, 0.8, 0.05, 0.0, 0.0];

    #[test]
    fn test_counting_laws_agree_without_branching() {
        let poisson = ChargeSpectrum::new(&PoissonCounting, 6);
        let vinogradov = ChargeSpectrum::new(&VinogradovCounting, 6);
        for i in 0..40 {
            let x = -0.2 + 0.1 * i as f64;
            let a = poisson.eval(x, &PARAMS).unwrap();
            let b = vinogradov.eval(x, &PARAMS).unwrap();
            assert_eq!(a, b, "x={x}");
        }
    }

    #[test]
    fn test_peak_heights_follow_counting_weights() {
        let spectrum = ChargeSpectrum::new(&PoissonCounting, 8);
        // Narrow peaks: neighbors contribute nothing at a peak center.
        let zero = spectrum.eval(0.1, &PARAMS).unwrap();
        let one = spectrum.eval(0.9, &PARAMS).unwrap();
        let p0 = crate::poisson::pmf(0, 0.5).unwrap();
        let p1 = crate::poisson::pmf(1, 0.5).unwrap();
        assert_relative_eq!(zero, 1000.0 * p0, epsilon = 1e-6);
        assert_relative_eq!(one, 1000.0 * p1, epsilon = 1e-6);
        assert_relative_eq!(one / zero, p1 / p0, epsilon = 1e-9);
    }

    #[test]
    fn test_truncation_is_respected() {
        let short = ChargeSpectrum::new(&PoissonCounting, 2);
        // The two-photoelectron peak sits at offset + 2q; with only two
        // mixture terms the curve is flat there.
        let at_two = short.eval(0.1 + 1.6, &PARAMS).unwrap();
        assert!(at_two < 1e-9, "truncated spectrum leaked: {at_two}");
        let full = ChargeSpectrum::new(&PoissonCounting, 8);
        assert!(full.eval(0.1 + 1.6, &PARAMS).unwrap() > 1.0);
    }

    #[test]
    fn test_spe_charge_spread_widens_higher_peaks() {
        let spectrum = ChargeSpectrum::new(&PoissonCounting, 8);
        let mut widened = PARAMS;
        widened[par::SPE_CHARGE_SPREAD] = 0.1;
        // The one-photoelectron shoulder fills in as the peak widens, while
        // the zero peak (no charge-spread term) is untouched.
        let shoulder = spectrum.eval(1.05, &PARAMS).unwrap();
        let shoulder_wide = spectrum.eval(1.05, &widened).unwrap();
        assert!(shoulder_wide > 10.0 * shoulder);
        assert_relative_eq!(
            spectrum.eval(0.1, &PARAMS).unwrap(),
            spectrum.eval(0.1, &widened).unwrap(),
            epsilon = 1e-7
        );
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let spectrum = ChargeSpectrum::new(&PoissonCounting, 4);
        assert!(spectrum.eval(0.0, &[1.0, 2.0]).is_err());
    }
}
