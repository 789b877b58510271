//! # qc-fit
//!
//! Fit engine for qcal: bounded L-BFGS chi-square fits plus the two
//! calibration schedules built on them.
//!
//! The schedules are deliberately layered: [`optimizer`] knows nothing
//! about histograms, [`chi2`] knows nothing about charge spectra, and the
//! SPE / sodium schedules only compose the layers below.

/// Zero-peak calibration against a filtered companion histogram.
pub mod calibrate;
/// Chi-square objective, parameter states, covariance extraction.
pub mod chi2;
/// Windowed single-Gaussian fits.
pub mod gaussfit;
/// Bounded L-BFGS minimizer (argmin backend).
pub mod optimizer;
/// 511 keV photopeak search and fit.
pub mod sodium;
/// Two-stage single-photoelectron mixture fit.
pub mod spe;

pub use calibrate::{calibrate, CalibratorConfig, NoiseCalibration};
pub use chi2::{fit_curve, fit_probability, ParamState};
pub use gaussfit::fit_gaussian;
pub use optimizer::{BoundedLbfgs, MinimizeResult, ObjectiveFunction, OptimizerConfig};
pub use sodium::{fit_gamma_peak, height_fraction_for_bias, GammaPeakFit};
pub use spe::{fit_spe, SpeConfig, SpeFit};
