//! Core types for qcal: errors, fit results, and the curve-model trait
//! shared by the fitting and model crates.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::CurveModel;
pub use types::{ChargeMeasurement, DataType, FitResult};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
