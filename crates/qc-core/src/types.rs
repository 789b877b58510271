//! Common data types for qcal

use serde::{Deserialize, Serialize};

/// Which calibration path produced a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single-photoelectron charge from a low-light spectrum fit.
    Spe,
    /// Reference gamma-peak position (511 keV source).
    Sodium,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Spe => write!(f, "spe"),
            DataType::Sodium => write!(f, "sodium"),
        }
    }
}

/// One exported calibration value: a row of the output table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeMeasurement {
    /// Calibration path that produced the value.
    pub data_type: DataType,
    /// Channel identifier (the histogram name).
    pub channel: String,
    /// Fitted charge (SPE charge or gamma-peak position).
    pub charge: f64,
    /// Standard error on the charge.
    pub charge_error: f64,
}

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal; 0 for parameters
    /// pinned during the fit)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Chi-square at the minimum
    pub chi2: f64,

    /// Degrees of freedom: fitted bins minus floating parameters
    pub ndof: usize,

    /// Convergence status of the minimizer
    pub converged: bool,

    /// Whether the result is usable as a measurement: converged with a
    /// positive-definite covariance and finite errors. When false, callers
    /// must not export `parameters` or trust `uncertainties`.
    pub is_valid: bool,

    /// Number of optimizer iterations
    pub n_iter: usize,
}

impl FitResult {
    /// Create a fit result without a covariance matrix (never valid).
    pub fn new(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        chi2: f64,
        ndof: usize,
        converged: bool,
        n_iter: usize,
    ) -> Self {
        Self {
            parameters,
            uncertainties,
            covariance: None,
            chi2,
            ndof,
            converged,
            is_valid: false,
            n_iter,
        }
    }

    /// Create a fit result with a covariance matrix.
    pub fn with_covariance(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        chi2: f64,
        ndof: usize,
        converged: bool,
        n_iter: usize,
    ) -> Self {
        let finite_errors = uncertainties.iter().all(|u| u.is_finite());
        Self {
            parameters,
            uncertainties,
            covariance: Some(covariance),
            chi2,
            ndof,
            converged,
            is_valid: converged && finite_errors,
            n_iter,
        }
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is
    /// unavailable or a pinned parameter is involved.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}
