//! Vinogradov branching-Poisson photoelectron counting.
//!
//! Models optically induced secondary pulses: primaries arrive Poisson with
//! mean `lambda`, and each one seeds a geometric chain of secondaries with
//! per-stage probability `ps`. The PMF is
//!
//! `P(N) = e^{-λ}/N! · Σ_{i=0}^{N} B(i,N) (λ(1-ps))^i ps^{N-i}`
//!
//! with `B(0,0)=1`, `B(0,N>0)=0` and otherwise
//! `B(i,N) = N!(N-1)! / (i!(i-1)!(N-i)!)`. `ps = 0` reduces exactly to the
//! Poisson law, an identity the SPE schedule relies on.

use qc_core::{Error, Result};

use crate::poisson;
use crate::poisson::ln_factorial;

/// ln B(i, N) for `1 <= i <= N`.
fn ln_branching_coeff(i: u64, n: u64) -> f64 {
    ln_factorial(n) + ln_factorial(n - 1)
        - ln_factorial(i)
        - ln_factorial(i - 1)
        - ln_factorial(n - i)
}

/// PMF of the branching-Poisson law at `k` for primary mean `lambda` and
/// secondary-emission probability `ps`.
pub fn pmf(k: u32, lambda: f64, ps: f64) -> Result<f64> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::Validation(format!(
            "lambda must be finite and >= 0, got {}",
            lambda
        )));
    }
    if !ps.is_finite() || ps < 0.0 || ps >= 1.0 {
        return Err(Error::Validation(format!("ps must be in [0, 1), got {}", ps)));
    }
    if ps == 0.0 {
        return poisson::pmf(k, lambda);
    }
    if lambda == 0.0 {
        return Ok(if k == 0 { 1.0 } else { 0.0 });
    }
    // The zero term carries no branching factor, for any ps.
    if k == 0 {
        return Ok((-lambda).exp());
    }

    // Sum the i = 1..=k branch terms in log space; the gamma-function form
    // of B(i,N) keeps this stable out to the truncation ceiling.
    let n = k as u64;
    let ln_mu = (lambda * (1.0 - ps)).ln();
    let ln_ps = ps.ln();
    let mut terms = Vec::with_capacity(k as usize);
    for i in 1..=n {
        terms.push(
            ln_branching_coeff(i, n) + i as f64 * ln_mu + (n - i) as f64 * ln_ps,
        );
    }
    let peak = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = terms.iter().map(|t| (t - peak).exp()).sum();
    Ok((peak + sum.ln() - lambda - ln_factorial(n)).exp())
}
