//! Local-maximum peak search with a relative height threshold.

use qc_core::{Error, Result};

use crate::histogram::Histogram;

/// Candidate peaks located by [`find_peaks`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeakSet {
    /// Peak positions (bin centers), sorted ascending by charge.
    pub positions: Vec<f64>,
    /// Position of the tallest peak, independent of the charge ordering.
    /// `None` when no peak was found.
    pub tallest: Option<f64>,
}

impl PeakSet {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Locate local maxima separated by at least `width` bins, then drop those
/// shorter than `height_fraction` of the tallest maximum found.
///
/// The threshold is relative to the tallest *found* peak, so a histogram
/// with uniformly small contents still reports its structure. An empty or
/// featureless histogram yields an empty `PeakSet`, not an error.
pub fn find_peaks(hist: &Histogram, width: usize, height_fraction: f64) -> Result<PeakSet> {
    if width == 0 {
        return Err(Error::Validation("peak search width must be at least 1 bin".into()));
    }
    if !(height_fraction > 0.0 && height_fraction <= 1.0) {
        return Err(Error::Validation(format!(
            "height fraction must be in (0, 1], got {height_fraction}"
        )));
    }

    let content = &hist.bin_content;
    let n = content.len();

    // A candidate dominates its neighborhood: strictly taller than every bin
    // to its left within `width`, at least as tall as every bin to its right.
    // The asymmetry keeps exactly one candidate per flat-topped peak.
    let mut candidates: Vec<usize> = Vec::new();
    for i in 0..n {
        if content[i] <= 0.0 {
            continue;
        }
        let lo = i.saturating_sub(width);
        let hi = (i + width).min(n - 1);
        let dominated = (lo..i).any(|j| content[j] >= content[i])
            || (i + 1..=hi).any(|j| content[j] > content[i]);
        if !dominated {
            candidates.push(i);
        }
    }

    if candidates.is_empty() {
        return Ok(PeakSet { positions: Vec::new(), tallest: None });
    }

    let tallest_idx = candidates
        .iter()
        .copied()
        .max_by(|a, b| content[*a].total_cmp(&content[*b]))
        .unwrap_or(candidates[0]);
    let cutoff = height_fraction * content[tallest_idx];

    let positions: Vec<f64> = candidates
        .iter()
        .copied()
        .filter(|&i| content[i] >= cutoff)
        .map(|i| hist.bin_center(i))
        .collect();

    Ok(PeakSet { positions, tallest: Some(hist.bin_center(tallest_idx)) })
}
