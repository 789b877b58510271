//! Windowed single-Gaussian fits.

use qc_core::{Error, FitResult, Result};
use qc_hist::Histogram;
use qc_models::gaussian::GaussianCurve;

use crate::chi2::{fit_curve, ParamState};
use crate::optimizer::OptimizerConfig;

/// Fit one Gaussian to the bins within `center ± half_window`.
///
/// The mean is seeded from the tallest bin in the window and confined to the
/// window during the fit; the width is seeded from the windowed standard
/// deviation. Callers that need a different neighborhood re-center and call
/// again.
pub fn fit_gaussian(
    hist: &Histogram,
    center: f64,
    half_window: f64,
    config: &OptimizerConfig,
) -> Result<FitResult> {
    if !center.is_finite() || !half_window.is_finite() || half_window <= 0.0 {
        return Err(Error::Validation(format!(
            "invalid fit window {center} +- {half_window}"
        )));
    }

    let range = (center - half_window, center + half_window);
    let (seed_mean, seed_height) = hist.max_in(range.0, range.1);
    if seed_height <= 0.0 {
        return Err(Error::Computation(format!(
            "no counts in '{}' near {:.4}",
            hist.name, center
        )));
    }
    let seed_sigma = windowed_std(hist, range).max(hist.bin_width());

    // Keep sigma clear of zero: the curve rejects non-positive widths and
    // the covariance step probes below the best-fit value.
    let sigma_floor = (hist.bin_width() * 0.1).max(1e-6);
    let init = [seed_height, seed_mean, seed_sigma];
    let states = [
        ParamState::Bounded(0.0, f64::INFINITY),
        ParamState::Bounded(range.0, range.1),
        ParamState::Bounded(sigma_floor, 2.0 * half_window),
    ];

    fit_curve(&GaussianCurve, hist, range, &init, &states, config)
}

/// Content-weighted standard deviation of the bins inside `range`.
fn windowed_std(hist: &Histogram, range: (f64, f64)) -> f64 {
    let mut sum = 0.0;
    let mut sum_x = 0.0;
    let mut sum_x2 = 0.0;
    for i in 0..hist.n_bins {
        let x = hist.bin_center(i);
        if x < range.0 || x > range.1 {
            continue;
        }
        let w = hist.bin_content[i];
        if w <= 0.0 {
            continue;
        }
        sum += w;
        sum_x += w * x;
        sum_x2 += w * x * x;
    }
    if sum <= 0.0 {
        return 0.0;
    }
    let mean = sum_x / sum;
    (sum_x2 / sum - mean * mean).max(0.0).sqrt()
}
