use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    config::write_yaml,
    utils::{get_bin_edges, get_bin_index},
    VertexResult,
};

fn check_binning(bins: usize, range: (f64, f64)) {
    assert!(bins > 0, "Number of bins must be greater than zero!");
    assert!(
        range.1 > range.0,
        "The lower edge of the range must be smaller than the upper edge!"
    );
}

/// A one-dimensional histogram with evenly spaced bins.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram1D {
    /// The (weighted) number of counts in each bin
    pub counts: Vec<f64>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    entries: usize,
    sum_weights: f64,
    sum_weighted_values: f64,
    sum_weighted_squares: f64,
    #[serde(skip)]
    range: (f64, f64),
}

impl Histogram1D {
    /// Create an empty histogram with `bins` evenly spaced bins within `range`.
    ///
    /// # Panics
    ///
    /// Panics if `bins` is zero or the range is empty.
    pub fn new(bins: usize, range: (f64, f64)) -> Self {
        check_binning(bins, range);
        Self {
            counts: vec![0.0; bins],
            bin_edges: get_bin_edges(bins, range),
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
            sum_weights: 0.0,
            sum_weighted_values: 0.0,
            sum_weighted_squares: 0.0,
            range,
        }
    }

    /// Add one count to the bin containing `value`.
    pub fn fill(&mut self, value: f64) {
        self.fill_weighted(value, 1.0);
    }

    /// Add `weight` to the bin containing `value`. Non-finite values are ignored.
    pub fn fill_weighted(&mut self, value: f64, weight: f64) {
        if !value.is_finite() {
            return;
        }
        self.entries += 1;
        match get_bin_index(value, self.counts.len(), self.range) {
            Some(index) => {
                self.counts[index] += weight;
                self.sum_weights += weight;
                self.sum_weighted_values += weight * value;
                self.sum_weighted_squares += weight * value * value;
            }
            None if value < self.range.0 => self.underflow += weight,
            None => self.overflow += weight,
        }
    }

    /// The number of calls to [`Histogram1D::fill`] with a finite value, including those outside
    /// the range.
    pub fn entries(&self) -> usize {
        self.entries
    }
    /// The sum of weights within the range.
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }
    /// The weighted mean of the in-range values, or zero for an empty histogram.
    pub fn mean(&self) -> f64 {
        if self.sum_weights == 0.0 {
            return 0.0;
        }
        self.sum_weighted_values / self.sum_weights
    }
    /// The weighted standard deviation of the in-range values.
    pub fn rms(&self) -> f64 {
        if self.sum_weights == 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_weighted_squares / self.sum_weights - mean * mean)
            .max(0.0)
            .sqrt()
    }
}

/// A two-dimensional histogram with evenly spaced bins along each axis.
///
/// Entries outside either range are counted in `out_of_range` only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram2D {
    /// Counts indexed as `counts[x_bin][y_bin]`
    pub counts: Vec<Vec<f64>>,
    pub x_bin_edges: Vec<f64>,
    pub y_bin_edges: Vec<f64>,
    pub out_of_range: f64,
    entries: usize,
    #[serde(skip)]
    x_range: (f64, f64),
    #[serde(skip)]
    y_range: (f64, f64),
}

impl Histogram2D {
    /// Create an empty histogram. Panics on an empty binning along either axis.
    pub fn new(x_bins: usize, x_range: (f64, f64), y_bins: usize, y_range: (f64, f64)) -> Self {
        check_binning(x_bins, x_range);
        check_binning(y_bins, y_range);
        Self {
            counts: vec![vec![0.0; y_bins]; x_bins],
            x_bin_edges: get_bin_edges(x_bins, x_range),
            y_bin_edges: get_bin_edges(y_bins, y_range),
            out_of_range: 0.0,
            entries: 0,
            x_range,
            y_range,
        }
    }

    /// Add one count to the bin containing `(x, y)`.
    pub fn fill(&mut self, x: f64, y: f64) {
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        self.entries += 1;
        let x_bins = self.counts.len();
        let y_bins = self.y_bin_edges.len() - 1;
        match (
            get_bin_index(x, x_bins, self.x_range),
            get_bin_index(y, y_bins, self.y_range),
        ) {
            (Some(i), Some(j)) => self.counts[i][j] += 1.0,
            _ => self.out_of_range += 1.0,
        }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

/// The mean of a quantity as a function of another, in evenly spaced bins.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Profile1D {
    pub bin_edges: Vec<f64>,
    entries: Vec<usize>,
    sums: Vec<f64>,
    sums_of_squares: Vec<f64>,
    #[serde(skip)]
    range: (f64, f64),
}

impl Profile1D {
    /// Create an empty profile with `bins` bins in `x` within `range`.
    pub fn new(bins: usize, range: (f64, f64)) -> Self {
        check_binning(bins, range);
        Self {
            bin_edges: get_bin_edges(bins, range),
            entries: vec![0; bins],
            sums: vec![0.0; bins],
            sums_of_squares: vec![0.0; bins],
            range,
        }
    }

    /// Add `y` to the bin containing `x`. Entries outside the range are dropped.
    pub fn fill(&mut self, x: f64, y: f64) {
        if !y.is_finite() {
            return;
        }
        if let Some(index) = get_bin_index(x, self.entries.len(), self.range) {
            self.entries[index] += 1;
            self.sums[index] += y;
            self.sums_of_squares[index] += y * y;
        }
    }

    /// The number of values added to bin `bin`.
    pub fn entries(&self, bin: usize) -> usize {
        self.entries.get(bin).copied().unwrap_or(0)
    }

    /// The mean of bin `bin`, or [`None`] if it is empty.
    pub fn mean(&self, bin: usize) -> Option<f64> {
        let n = self.entries(bin);
        (n > 0).then(|| self.sums[bin] / n as f64)
    }

    /// The standard error of the mean of bin `bin`, or [`None`] if it is empty.
    pub fn error(&self, bin: usize) -> Option<f64> {
        let n = self.entries(bin);
        let mean = self.mean(bin)?;
        let variance = (self.sums_of_squares[bin] / n as f64 - mean * mean).max(0.0);
        Some((variance / n as f64).sqrt())
    }
}

/// A named collection of histograms filled during an analysis.
///
/// Each histogram is created with the given binning on first access and reused afterwards.
#[derive(Clone, Debug, Default, Serialize)]
pub struct HistogramSink {
    histograms_1d: BTreeMap<String, Histogram1D>,
    histograms_2d: BTreeMap<String, Histogram2D>,
    profiles: BTreeMap<String, Profile1D>,
}

impl HistogramSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The 1D histogram `name`, booked with `bins` and `range` if it does not exist yet.
    pub fn histogram_1d(&mut self, name: &str, bins: usize, range: (f64, f64)) -> &mut Histogram1D {
        self.histograms_1d
            .entry(name.to_string())
            .or_insert_with(|| Histogram1D::new(bins, range))
    }

    /// The 2D histogram `name`, booked with the given binning if it does not exist yet.
    pub fn histogram_2d(
        &mut self,
        name: &str,
        x_bins: usize,
        x_range: (f64, f64),
        y_bins: usize,
        y_range: (f64, f64),
    ) -> &mut Histogram2D {
        self.histograms_2d
            .entry(name.to_string())
            .or_insert_with(|| Histogram2D::new(x_bins, x_range, y_bins, y_range))
    }

    /// The profile `name`, booked with `bins` and `range` if it does not exist yet.
    pub fn profile_1d(&mut self, name: &str, bins: usize, range: (f64, f64)) -> &mut Profile1D {
        self.profiles
            .entry(name.to_string())
            .or_insert_with(|| Profile1D::new(bins, range))
    }

    /// The 1D histogram `name`, if booked.
    pub fn get_1d(&self, name: &str) -> Option<&Histogram1D> {
        self.histograms_1d.get(name)
    }
    /// The 2D histogram `name`, if booked.
    pub fn get_2d(&self, name: &str) -> Option<&Histogram2D> {
        self.histograms_2d.get(name)
    }
    /// The profile `name`, if booked.
    pub fn get_profile(&self, name: &str) -> Option<&Profile1D> {
        self.profiles.get(name)
    }

    /// The names of every booked object, in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .histograms_1d
            .keys()
            .chain(self.histograms_2d.keys())
            .chain(self.profiles.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Write every booked object to a YAML file.
    pub fn write_yaml(&self, file_path: &str) -> VertexResult<()> {
        write_yaml(self, file_path)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_histogram_1d() {
        let mut hist = Histogram1D::new(4, (0.0, 4.0));
        for value in [0.5, 1.5, 1.7, 3.9, -1.0, 4.0, f64::NAN] {
            hist.fill(value);
        }
        assert_eq!(hist.counts, vec![1.0, 2.0, 0.0, 1.0]);
        assert_eq!(hist.bin_edges, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(hist.underflow, 1.0);
        assert_relative_eq!(hist.overflow, 1.0);
        assert_eq!(hist.entries(), 6);
        assert_relative_eq!(hist.integral(), 4.0);
        assert_relative_eq!(hist.mean(), 1.9);
        assert_relative_eq!(
            hist.rms(),
            ((0.25 + 2.25 + 2.89 + 15.21) / 4.0 - 1.9 * 1.9_f64).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    #[should_panic]
    fn test_empty_range() {
        Histogram1D::new(10, (1.0, 1.0));
    }

    #[test]
    fn test_histogram_2d() {
        let mut hist = Histogram2D::new(2, (0.0, 2.0), 2, (-1.0, 1.0));
        hist.fill(0.5, 0.5);
        hist.fill(1.5, -0.5);
        hist.fill(1.5, -0.2);
        hist.fill(3.0, 0.0);
        assert_eq!(hist.counts, vec![vec![0.0, 1.0], vec![2.0, 0.0]]);
        assert_relative_eq!(hist.out_of_range, 1.0);
        assert_eq!(hist.entries(), 4);
    }

    #[test]
    fn test_profile() {
        let mut profile = Profile1D::new(2, (0.0, 2.0));
        profile.fill(0.5, 1.0);
        profile.fill(0.7, 3.0);
        profile.fill(5.0, 100.0);
        assert_eq!(profile.entries(0), 2);
        assert_relative_eq!(profile.mean(0).unwrap(), 2.0);
        assert_relative_eq!(profile.error(0).unwrap(), (1.0_f64 / 2.0).sqrt());
        assert!(profile.mean(1).is_none());
        assert!(profile.mean(7).is_none());
    }

    #[test]
    fn test_sink_reuses_histograms() {
        let mut sink = HistogramSink::new();
        sink.histogram_1d("a", 10, (0.0, 1.0)).fill(0.5);
        sink.histogram_1d("a", 3, (-5.0, 5.0)).fill(0.55);
        sink.profile_1d("p", 5, (0.0, 1.0)).fill(0.1, 1.0);
        sink.histogram_2d("b", 2, (0.0, 1.0), 2, (0.0, 1.0)).fill(0.1, 0.1);
        let hist = sink.get_1d("a").unwrap();
        assert_eq!(hist.counts.len(), 10);
        assert_relative_eq!(hist.counts[5], 2.0);
        assert_eq!(sink.names(), vec!["a", "b", "p"]);
        assert!(sink.get_1d("missing").is_none());
        let yaml = serde_yaml::to_string(&sink).unwrap();
        assert!(yaml.contains("histograms_1d"));
    }
}
