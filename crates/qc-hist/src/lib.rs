//! Charge-histogram containers and peak search for qcal.
//!
//! Histograms arrive from the readout as uniformly binned counts; this crate
//! hosts the read-only view the fitters consume, the name-keyed collection
//! with the `f_<name>` filtered-pair convention, and the local-maximum peak
//! search.

pub mod histogram;
pub mod peaks;
pub mod store;

pub use histogram::Histogram;
pub use peaks::{find_peaks, PeakSet};
pub use store::HistogramSet;
