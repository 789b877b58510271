//! Statistical models for photodetector charge spectra.
//!
//! This crate hosts the probability math the fitters build on:
//! - photoelectron counting laws (Poisson and the Vinogradov branching
//!   variant for optically induced secondary pulses)
//! - the height-parameterized Gaussian peak curve
//! - the counting-model-weighted mixture spectrum

pub mod gaussian;
pub mod poisson;
pub mod spectrum;
pub mod vinogradov;

pub use gaussian::GaussianCurve;
pub use spectrum::{ChargeSpectrum, PhotoelectronModel, PoissonCounting, VinogradovCounting};
