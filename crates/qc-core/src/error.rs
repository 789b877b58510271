//! Error types for qcal

use thiserror::Error;

/// qcal error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Histogram has too few entries for a stable fit. Per-histogram, non-fatal:
    /// the batch skips the histogram and continues.
    #[error("Insufficient statistics: {0}")]
    InsufficientStatistics(String),

    /// No candidate peak passed the acceptance cuts. Per-histogram, non-fatal.
    #[error("Peak not found: {0}")]
    PeakNotFound(String),

    /// The minimizer terminated without a usable covariance. Per-histogram,
    /// non-fatal; the affected parameters must not be exported.
    #[error("Fit did not converge: {0}")]
    FitDidNotConverge(String),

    /// Bias voltage below the lowest calibrated operating regime. Fatal for
    /// the whole invocation: the peak-search presets are undefined there.
    #[error("Unsupported bias voltage: {0} V")]
    UnsupportedBiasVoltage(f64),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
