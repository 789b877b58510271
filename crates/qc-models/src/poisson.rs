//! Poisson photoelectron-counting utilities.

use qc_core::{Error, Result};
use statrs::distribution::{DiscreteCDF, Poisson};
use statrs::function::gamma::ln_gamma;

#[inline]
pub(crate) fn ln_factorial(n: u64) -> f64 {
    ln_gamma(n as f64 + 1.0)
}

/// Log-PMF of a Poisson distribution with mean `lambda` at `k`.
///
/// `lambda = 0` is allowed and puts all mass at `k = 0`.
pub fn logpmf(k: u32, lambda: f64) -> Result<f64> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::Validation(format!(
            "lambda must be finite and >= 0, got {}",
            lambda
        )));
    }
    if lambda == 0.0 {
        return Ok(if k == 0 { 0.0 } else { f64::NEG_INFINITY });
    }
    Ok(k as f64 * lambda.ln() - lambda - ln_factorial(k as u64))
}

/// PMF of a Poisson distribution with mean `lambda` at `k`.
pub fn pmf(k: u32, lambda: f64) -> Result<f64> {
    Ok(logpmf(k, lambda)?.exp())
}

/// Smallest `k` with `CDF(k) >= p`.
pub fn quantile(p: f64, lambda: f64) -> Result<u32> {
    if !(p > 0.0 && p < 1.0) {
        return Err(Error::Validation(format!("quantile level must be in (0,1), got {}", p)));
    }
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::Validation(format!(
            "lambda must be finite and >= 0, got {}",
            lambda
        )));
    }
    if lambda == 0.0 {
        return Ok(0);
    }
    let dist = Poisson::new(lambda)
        .map_err(|e| Error::Validation(format!("invalid Poisson mean {lambda}: {e}")))?;
    Ok(dist.inverse_cdf(p) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pmf_small_values() {
        assert_relative_eq!(pmf(0, 2.0).unwrap(), (-2.0f64).exp(), epsilon = 1e-14);
        assert_relative_eq!(pmf(1, 2.0).unwrap(), 2.0 * (-2.0f64).exp(), epsilon = 1e-14);
        assert_relative_eq!(pmf(3, 2.0).unwrap(), 8.0 / 6.0 * (-2.0f64).exp(), epsilon = 1e-13);
    }

    #[test]
    fn test_zero_mean_degenerates() {
        assert_eq!(pmf(0, 0.0).unwrap(), 1.0);
        assert_eq!(pmf(5, 0.0).unwrap(), 0.0);
        assert_eq!(quantile(0.95, 0.0).unwrap(), 0);
    }

    #[test]
    fn test_normalization() {
        for &lambda in &[0.1, 1.0, 4.5] {
            let total: f64 = (0..60).map(|k| pmf(k, lambda).unwrap()).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_quantile_brackets_cdf() {
        let lambda = 3.0;
        let q = quantile(0.95, lambda).unwrap();
        let cdf = |k: u32| -> f64 { (0..=k).map(|i| pmf(i, lambda).unwrap()).sum() };
        assert!(cdf(q) >= 0.95);
        if q > 0 {
            assert!(cdf(q - 1) < 0.95);
        }
    }

    #[test]
    fn test_invalid_params() {
        assert!(pmf(0, -1.0).is_err());
        assert!(pmf(0, f64::NAN).is_err());
        assert!(quantile(0.0, 1.0).is_err());
        assert!(quantile(1.0, 1.0).is_err());
    }
}
