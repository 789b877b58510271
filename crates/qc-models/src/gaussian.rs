//! Height-parameterized Gaussian peak curve.

use qc_core::{CurveModel, Error, Result};

/// Parameter vector layout for [`GaussianCurve`].
pub mod par {
    pub const AMPLITUDE: usize = 0;
    pub const MEAN: usize = 1;
    pub const SIGMA: usize = 2;
    pub const N_PARAMS: usize = 3;
}

/// `amplitude * exp(-(x - mean)^2 / (2 sigma^2))`.
///
/// The amplitude is the peak height, not an area: fitted amplitudes compare
/// directly against bin contents.
#[inline]
pub fn peak_value(x: f64, amplitude: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    amplitude * (-0.5 * z * z).exp()
}

/// Single Gaussian peak as a fittable curve.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianCurve;

impl CurveModel for GaussianCurve {
    fn n_parameters(&self) -> usize {
        par::N_PARAMS
    }

    fn parameter_names(&self) -> Vec<String> {
        vec!["amplitude".into(), "mean".into(), "sigma".into()]
    }

    fn eval(&self, x: f64, params: &[f64]) -> Result<f64> {
        if params.len() != par::N_PARAMS {
            return Err(Error::Validation(format!(
                "Gaussian curve takes {} parameters, got {}",
                par::N_PARAMS,
                params.len()
            )));
        }
        let sigma = params[par::SIGMA];
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::Validation(format!(
                "sigma must be finite and > 0, got {}",
                sigma
            )));
        }
        Ok(peak_value(x, params[par::AMPLITUDE], params[par::MEAN], sigma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_peak_height_at_mean() {
        let curve = GaussianCurve;
        let p = [7.0, 1.5, 0.2];
        assert_relative_eq!(curve.eval(1.5, &p).unwrap(), 7.0);
        // One sigma out: height falls to exp(-1/2).
        assert_relative_eq!(
            curve.eval(1.7, &p).unwrap(),
            7.0 * (-0.5f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_symmetry() {
        let curve = GaussianCurve;
        let p = [3.0, -1.0, 0.7];
        let left = curve.eval(-1.9, &p).unwrap();
        let right = curve.eval(-0.1, &p).unwrap();
        assert_relative_eq!(left, right, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_sigma() {
        let curve = GaussianCurve;
        assert!(curve.eval(0.0, &[1.0, 0.0, 0.0]).is_err());
        assert!(curve.eval(0.0, &[1.0, 0.0, -0.5]).is_err());
        assert!(curve.eval(0.0, &[1.0, 0.0]).is_err());
    }
}
