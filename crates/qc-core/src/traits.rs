//! Core traits for qcal
//!
//! The fitter depends on this curve abstraction rather than on concrete
//! model types, so fit schedules and model formulations can vary
//! independently.

use crate::Result;

/// A parametric curve y = f(x; params) evaluated pointwise over a histogram.
///
/// Implementations must be pure in `params`: the chi-square objective and
/// the numerical derivatives both re-evaluate the curve at perturbed
/// parameter vectors.
pub trait CurveModel: Send + Sync {
    /// Number of parameters
    fn n_parameters(&self) -> usize;

    /// Parameter names, in vector order
    fn parameter_names(&self) -> Vec<String>;

    /// Evaluate the curve at `x` for the given parameter vector.
    fn eval(&self, x: f64, params: &[f64]) -> Result<f64>;
}
