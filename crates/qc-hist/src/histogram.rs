//! Uniformly binned charge histogram.

use qc_core::{Error, Result};

/// A 1D histogram with uniform binning, read-only for the duration of a fit.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Histogram name (doubles as the channel identifier).
    pub name: String,
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge of the first bin.
    pub x_min: f64,
    /// Upper edge of the last bin.
    pub x_max: f64,
    /// Bin contents (length = n_bins).
    pub bin_content: Vec<f64>,
    /// Total entries (sum of bin contents).
    pub entries: f64,
}

impl Histogram {
    /// Build a histogram from uniform-bin counts, validating the domain.
    pub fn new(
        name: impl Into<String>,
        x_min: f64,
        x_max: f64,
        bin_content: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if bin_content.is_empty() {
            return Err(Error::Validation(format!("histogram '{name}' has no bins")));
        }
        if !(x_min.is_finite() && x_max.is_finite() && x_max > x_min) {
            return Err(Error::Validation(format!(
                "histogram '{name}' has invalid range [{x_min}, {x_max}]"
            )));
        }
        if let Some(bad) = bin_content.iter().find(|c| !c.is_finite() || **c < 0.0) {
            return Err(Error::Validation(format!(
                "histogram '{name}' has a negative or non-finite bin content ({bad})"
            )));
        }
        let entries = bin_content.iter().sum();
        let n_bins = bin_content.len();
        Ok(Self { name, n_bins, x_min, x_max, bin_content, entries })
    }

    /// Width of one bin.
    pub fn bin_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.n_bins as f64
    }

    /// Center of bin `i`.
    pub fn bin_center(&self, i: usize) -> f64 {
        self.x_min + (i as f64 + 0.5) * self.bin_width()
    }

    /// Index of the bin containing `x`, clamped to the histogram domain.
    pub fn bin_index(&self, x: f64) -> usize {
        let i = ((x - self.x_min) / self.bin_width()).floor() as i64;
        i.clamp(0, self.n_bins as i64 - 1) as usize
    }

    /// Sum of contents over the whole bins containing `lo` and `hi` and every
    /// bin between them. Returns 0 for an inverted range.
    pub fn integral(&self, lo: f64, hi: f64) -> f64 {
        if hi < lo {
            return 0.0;
        }
        let a = self.bin_index(lo);
        let b = self.bin_index(hi);
        self.bin_content[a..=b].iter().sum()
    }

    /// Content-weighted mean charge. 0 for an empty histogram.
    pub fn mean(&self) -> f64 {
        if self.entries <= 0.0 {
            return 0.0;
        }
        let weighted: f64 =
            self.bin_content.iter().enumerate().map(|(i, c)| c * self.bin_center(i)).sum();
        weighted / self.entries
    }

    /// Content-weighted standard deviation. 0 for an empty histogram.
    pub fn std_dev(&self) -> f64 {
        if self.entries <= 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        let ss: f64 = self
            .bin_content
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let d = self.bin_center(i) - mean;
                c * d * d
            })
            .sum();
        (ss / self.entries).sqrt()
    }

    /// Charge below which a fraction `q` of the entries lies, interpolated
    /// inside the containing bin. `q` is clamped to [0, 1].
    pub fn quantile(&self, q: f64) -> f64 {
        if self.entries <= 0.0 {
            return self.x_min;
        }
        let target = q.clamp(0.0, 1.0) * self.entries;
        let mut cum = 0.0;
        for (i, c) in self.bin_content.iter().enumerate() {
            if cum + c >= target && *c > 0.0 {
                let frac = (target - cum) / c;
                return self.x_min + (i as f64 + frac) * self.bin_width();
            }
            cum += c;
        }
        self.x_max
    }

    /// Tallest bin over the whole bins spanning `[lo, hi]`, as
    /// `(bin center, content)`.
    pub fn max_in(&self, lo: f64, hi: f64) -> (f64, f64) {
        let a = self.bin_index(lo);
        let b = self.bin_index(hi.max(lo));
        let mut best = (self.bin_center(a), self.bin_content[a]);
        for i in a..=b {
            if self.bin_content[i] > best.1 {
                best = (self.bin_center(i), self.bin_content[i]);
            }
        }
        best
    }
}
