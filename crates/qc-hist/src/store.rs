//! Name-keyed histogram collection with the filtered-pair convention.
//!
//! A histogram named `X` may carry a noise-only counterpart named `f_X`,
//! accumulated with a high-pass filter so it contains no photoelectron
//! signal. The pair shares one binning domain.

use std::collections::BTreeMap;
use std::path::Path;

use qc_core::{Error, Result};
use serde::Deserialize;

use crate::histogram::Histogram;

/// Prefix that marks the noise-only counterpart of a histogram.
pub const FILTERED_PREFIX: &str = "f_";

#[derive(Debug, Deserialize)]
struct HistogramRecord {
    name: String,
    x_min: f64,
    x_max: f64,
    counts: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct HistogramFile {
    histograms: Vec<HistogramRecord>,
}

/// Collection of named histograms, iterated in name order.
#[derive(Debug, Default, Clone)]
pub struct HistogramSet {
    map: BTreeMap<String, Histogram>,
}

impl HistogramSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a set from a JSON document of the form
    /// `{"histograms": [{"name", "x_min", "x_max", "counts"}, ...]}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: HistogramFile = serde_json::from_str(json)?;
        let mut set = Self::new();
        for record in file.histograms {
            let hist =
                Histogram::new(record.name, record.x_min, record.x_max, record.counts)?;
            set.insert(hist)?;
        }
        set.check_pairs();
        Ok(set)
    }

    /// Load a set from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Insert a histogram keyed by its name. Duplicate names are rejected.
    pub fn insert(&mut self, hist: Histogram) -> Result<()> {
        if self.map.contains_key(&hist.name) {
            return Err(Error::Validation(format!("duplicate histogram name '{}'", hist.name)));
        }
        self.map.insert(hist.name.clone(), hist);
        Ok(())
    }

    /// Look up a histogram by name.
    pub fn get(&self, name: &str) -> Option<&Histogram> {
        self.map.get(name)
    }

    /// The noise-only counterpart of `name`, if present.
    pub fn filtered_pair(&self, name: &str) -> Option<&Histogram> {
        self.map.get(&format!("{FILTERED_PREFIX}{name}"))
    }

    /// Names of the primary histograms (everything not marked as a filtered
    /// counterpart), in sorted order.
    pub fn primary_names(&self) -> Vec<&str> {
        self.map
            .keys()
            .filter(|name| !name.starts_with(FILTERED_PREFIX))
            .map(String::as_str)
            .collect()
    }

    /// Iterate over all histograms in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Histogram)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Warn about filtered histograms whose binning disagrees with their
    /// primary. The calibrator only windows over charge values, so this is
    /// survivable, but it usually means a readout configuration slip.
    fn check_pairs(&self) {
        for name in self.primary_names() {
            if let (Some(h), Some(f)) = (self.get(name), self.filtered_pair(name)) {
                if h.n_bins != f.n_bins || h.x_min != f.x_min || h.x_max != f.x_max {
                    log::warn!(
                        "histogram '{name}' and its filtered pair have different binning"
                    );
                }
            }
        }
    }
}
