//! Chi-square curve fits over histogram bins.
//!
//! The objective is the weighted least-squares sum over filled bins inside
//! the fit range, with per-bin variance `max(n_i, 1)`. Parameter covariance
//! is `2 H^-1` with the Hessian taken over the floating parameters at the
//! minimum; pinned parameters come back with zero uncertainty.

use nalgebra::DMatrix;
use qc_core::{CurveModel, Error, FitResult, Result};
use qc_hist::Histogram;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::optimizer::{BoundedLbfgs, MinimizeResult, ObjectiveFunction, OptimizerConfig};

/// Per-parameter treatment in one fit stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamState {
    /// Floats without constraint.
    Free,
    /// Floats within `[low, high]`.
    Bounded(f64, f64),
    /// Pinned at the given value, reported with zero uncertainty.
    Fixed(f64),
}

impl ParamState {
    fn bounds(&self) -> (f64, f64) {
        match *self {
            ParamState::Free => (f64::NEG_INFINITY, f64::INFINITY),
            ParamState::Bounded(lo, hi) => (lo, hi),
            ParamState::Fixed(v) => (v, v),
        }
    }

    fn is_floating(&self) -> bool {
        !matches!(self, ParamState::Fixed(_))
    }
}

/// Weighted residual sum over the selected bins.
struct Chi2Objective<'a> {
    curve: &'a dyn CurveModel,
    centers: Vec<f64>,
    contents: Vec<f64>,
    inv_var: Vec<f64>,
}

impl<'a> Chi2Objective<'a> {
    /// Collect the filled bins whose centers fall inside `range`. Empty and
    /// negative bins carry no Poisson weight and are skipped.
    fn from_histogram(curve: &'a dyn CurveModel, hist: &Histogram, range: (f64, f64)) -> Self {
        let mut centers = Vec::new();
        let mut contents = Vec::new();
        let mut inv_var = Vec::new();
        for i in 0..hist.n_bins {
            let x = hist.bin_center(i);
            if x < range.0 || x > range.1 {
                continue;
            }
            let n = hist.bin_content[i];
            if n <= 0.0 {
                continue;
            }
            centers.push(x);
            contents.push(n);
            inv_var.push(1.0 / n.max(1.0));
        }
        Self { curve, centers, contents, inv_var }
    }

    fn n_bins(&self) -> usize {
        self.centers.len()
    }
}

impl ObjectiveFunction for Chi2Objective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let mut chi2 = 0.0;
        for ((&x, &n), &w) in self.centers.iter().zip(&self.contents).zip(&self.inv_var) {
            let f = self.curve.eval(x, params)?;
            let r = n - f;
            chi2 += w * r * r;
        }
        Ok(chi2)
    }
}

/// Full objective restricted to the floating parameters, with the pinned
/// ones spliced back in before every evaluation.
struct ReducedObjective<'a> {
    inner: &'a Chi2Objective<'a>,
    template: Vec<f64>,
    floating: &'a [usize],
}

impl ObjectiveFunction for ReducedObjective<'_> {
    fn eval(&self, sub: &[f64]) -> Result<f64> {
        let mut full = self.template.clone();
        for (&slot, &value) in self.floating.iter().zip(sub) {
            full[slot] = value;
        }
        self.inner.eval(&full)
    }
}

/// Fit `curve` to the histogram bins inside `range`.
///
/// `init` and `states` must both have one entry per curve parameter; the
/// initial value of a [`ParamState::Fixed`] parameter is taken from the
/// state, not from `init`.
pub fn fit_curve(
    curve: &dyn CurveModel,
    hist: &Histogram,
    range: (f64, f64),
    init: &[f64],
    states: &[ParamState],
    config: &OptimizerConfig,
) -> Result<FitResult> {
    let n_params = curve.n_parameters();
    if init.len() != n_params || states.len() != n_params {
        return Err(Error::Validation(format!(
            "curve takes {} parameters, got {} initial values and {} states",
            n_params,
            init.len(),
            states.len()
        )));
    }
    if !(range.0 <= range.1) {
        return Err(Error::Validation(format!(
            "invalid fit range [{}, {}]",
            range.0, range.1
        )));
    }

    let objective = Chi2Objective::from_histogram(curve, hist, range);
    if objective.n_bins() == 0 {
        return Err(Error::Computation(format!(
            "no filled bins of '{}' inside the fit range [{:.4}, {:.4}]",
            hist.name, range.0, range.1
        )));
    }

    let mut start = init.to_vec();
    for (value, state) in start.iter_mut().zip(states) {
        if let ParamState::Fixed(v) = state {
            *value = *v;
        }
    }
    let bounds: Vec<(f64, f64)> = states.iter().map(ParamState::bounds).collect();

    let optimizer = BoundedLbfgs::new(config.clone());
    let optimum = optimizer.minimize(&objective, &start, &bounds)?;

    let floating: Vec<usize> = (0..n_params).filter(|&i| states[i].is_floating()).collect();
    let ndof = objective.n_bins().saturating_sub(floating.len());

    Ok(assemble_result(&objective, &optimum, &floating, ndof))
}

/// Covariance and uncertainties at the minimum, embedded back into the full
/// parameter vector.
fn assemble_result(
    objective: &Chi2Objective<'_>,
    optimum: &MinimizeResult,
    floating: &[usize],
    ndof: usize,
) -> FitResult {
    let n_params = optimum.parameters.len();
    let best = &optimum.parameters;
    let mut uncertainties = vec![0.0; n_params];
    let mut covariance = vec![0.0; n_params * n_params];

    if floating.is_empty() {
        return FitResult::with_covariance(
            best.clone(),
            uncertainties,
            covariance,
            optimum.fval,
            ndof,
            optimum.converged,
            optimum.n_iter as usize,
        );
    }

    let k = floating.len();
    let reduced = ReducedObjective { inner: objective, template: best.clone(), floating };
    let sub_best: Vec<f64> = floating.iter().map(|&i| best[i]).collect();

    let hessian = match compute_hessian(&reduced, &sub_best) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("Hessian evaluation failed: {e}");
            return FitResult::new(
                best.clone(),
                uncertainties,
                optimum.fval,
                ndof,
                optimum.converged,
                optimum.n_iter as usize,
            );
        }
    };
    let diag_fallback = diagonal_uncertainties(&hessian, k);

    match invert_hessian(&hessian, k) {
        Some(inverse) => {
            // Chi-square covariance carries a factor two relative to the
            // inverse Hessian.
            let cov_sub = inverse * 2.0;
            let mut all_variances_ok = true;
            let mut sub_err = Vec::with_capacity(k);
            for i in 0..k {
                let var = cov_sub[(i, i)];
                if var.is_finite() && var > 0.0 {
                    sub_err.push(var.sqrt());
                } else {
                    all_variances_ok = false;
                    sub_err.push(diag_fallback[i]);
                }
            }
            for (si, &pi) in floating.iter().enumerate() {
                uncertainties[pi] = sub_err[si];
            }

            if all_variances_ok {
                for (si, &pi) in floating.iter().enumerate() {
                    for (sj, &pj) in floating.iter().enumerate() {
                        covariance[pi * n_params + pj] = cov_sub[(si, sj)];
                    }
                }
                FitResult::with_covariance(
                    best.clone(),
                    uncertainties,
                    covariance,
                    optimum.fval,
                    ndof,
                    optimum.converged,
                    optimum.n_iter as usize,
                )
            } else {
                log::warn!("Invalid covariance diagonal; omitting covariance matrix");
                FitResult::new(
                    best.clone(),
                    uncertainties,
                    optimum.fval,
                    ndof,
                    optimum.converged,
                    optimum.n_iter as usize,
                )
            }
        }
        None => {
            log::warn!("Hessian inversion failed, using diagonal approximation");
            for (si, &pi) in floating.iter().enumerate() {
                uncertainties[pi] = diag_fallback[si];
            }
            FitResult::new(
                best.clone(),
                uncertainties,
                optimum.fval,
                ndof,
                optimum.converged,
                optimum.n_iter as usize,
            )
        }
    }
}

/// Hessian from forward differences of the gradient, symmetrised.
fn compute_hessian(objective: &dyn ObjectiveFunction, best: &[f64]) -> Result<DMatrix<f64>> {
    let n = best.len();
    let grad_center = objective.gradient(best)?;

    let mut hessian = DMatrix::zeros(n, n);

    for j in 0..n {
        let eps = 1e-4 * best[j].abs().max(1.0);

        let mut params_plus = best.to_vec();
        params_plus[j] += eps;
        let grad_plus = objective.gradient(&params_plus)?;

        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
        }
    }

    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Invert the Hessian via a damped Cholesky solve.
///
/// Returns `None` when no usable positive-definite inverse exists.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    // Even at a genuine minimum the finite-difference Hessian can come out
    // slightly indefinite; damping the diagonal keeps the variances from
    // going negative.
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some(chol.solve(&identity));
        }

        if attempt + 1 == max_attempts {
            break;
        }

        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next_damping - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next_damping;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

/// Per-parameter error estimate from the Hessian diagonal alone.
fn diagonal_uncertainties(hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let denom = hessian[(i, i)].abs().max(1e-12);
            (2.0 / denom).sqrt()
        })
        .collect()
}

/// Upper-tail probability of observing `chi2` or worse for `ndof` degrees
/// of freedom.
pub fn fit_probability(chi2: f64, ndof: usize) -> Result<f64> {
    if ndof == 0 {
        return Err(Error::Validation(
            "chi-square probability needs at least one degree of freedom".to_string(),
        ));
    }
    let dist = ChiSquared::new(ndof as f64)
        .map_err(|e| Error::Computation(format!("chi-square distribution: {e}")))?;
    Ok(dist.sf(chi2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qc_models::gaussian::{self, GaussianCurve};

    fn gaussian_histogram(amplitude: f64, mean: f64, sigma: f64) -> Histogram {
        let n_bins = 200;
        let (x_min, x_max) = (-5.0, 5.0);
        let width = (x_max - x_min) / n_bins as f64;
        let counts: Vec<f64> = (0..n_bins)
            .map(|i| {
                let x = x_min + (i as f64 + 0.5) * width;
                gaussian::peak_value(x, amplitude, mean, sigma)
            })
            .collect();
        Histogram::new("pulse", x_min, x_max, counts).unwrap()
    }

    #[test]
    fn test_fit_recovers_gaussian() {
        let hist = gaussian_histogram(100.0, 0.5, 0.8);
        let states = [
            ParamState::Bounded(0.0, f64::INFINITY),
            ParamState::Free,
            ParamState::Bounded(1e-3, 10.0),
        ];
        let result = fit_curve(
            &GaussianCurve,
            &hist,
            (-5.0, 5.0),
            &[80.0, 0.3, 1.0],
            &states,
            &OptimizerConfig::default(),
        )
        .unwrap();

        assert!(result.converged, "fit should converge");
        assert!(result.is_valid);
        assert_relative_eq!(result.parameters[gaussian::par::AMPLITUDE], 100.0, max_relative = 1e-3);
        assert_relative_eq!(result.parameters[gaussian::par::MEAN], 0.5, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[gaussian::par::SIGMA], 0.8, max_relative = 1e-3);
        assert!(result.chi2 < 1e-4, "chi2 = {}", result.chi2);
        assert_eq!(result.ndof, 200 - 3);
        assert!(result.uncertainties.iter().all(|&u| u > 0.0));
    }

    #[test]
    fn test_fixed_parameter_is_pinned_with_zero_error() {
        let hist = gaussian_histogram(100.0, 0.5, 0.8);
        let states = [
            ParamState::Bounded(0.0, f64::INFINITY),
            ParamState::Free,
            ParamState::Fixed(0.8),
        ];
        let result = fit_curve(
            &GaussianCurve,
            &hist,
            (-5.0, 5.0),
            &[50.0, 0.0, 123.0],
            &states,
            &OptimizerConfig::default(),
        )
        .unwrap();

        assert_eq!(result.parameters[gaussian::par::SIGMA], 0.8);
        assert_eq!(result.uncertainties[gaussian::par::SIGMA], 0.0);
        assert_eq!(result.ndof, 200 - 2);
        assert_relative_eq!(result.parameters[gaussian::par::AMPLITUDE], 100.0, max_relative = 1e-3);
        assert!(result.uncertainties[gaussian::par::AMPLITUDE] > 0.0);

        // Pinned rows of the covariance stay zero.
        let cov = result.covariance.as_ref().unwrap();
        let n = result.parameters.len();
        for j in 0..n {
            assert_eq!(cov[gaussian::par::SIGMA * n + j], 0.0);
            assert_eq!(cov[j * n + gaussian::par::SIGMA], 0.0);
        }
    }

    #[test]
    fn test_empty_fit_range_is_rejected() {
        let hist = gaussian_histogram(100.0, 0.5, 0.8);
        let states = [ParamState::Free, ParamState::Free, ParamState::Bounded(1e-3, 10.0)];
        let err = fit_curve(
            &GaussianCurve,
            &hist,
            (20.0, 30.0),
            &[80.0, 0.3, 1.0],
            &states,
            &OptimizerConfig::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_fit_probability() {
        assert!(fit_probability(1.0, 0).is_err());
        assert_relative_eq!(fit_probability(0.0, 10).unwrap(), 1.0, epsilon = 1e-12);
        let loose = fit_probability(5.0, 5).unwrap();
        let tight = fit_probability(20.0, 5).unwrap();
        assert!(loose > tight);
        assert!(tight > 0.0);
    }
}
