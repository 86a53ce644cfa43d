use crate::series::{KeyedSeries, NumericSeries, VectorSeries};

/// The entry point for running analyses.
///
/// Create an environment, wrap sharded data via
/// [`numeric_series`](Self::numeric_series),
/// [`vector_series`](Self::vector_series) or
/// [`keyed_series`](Self::keyed_series), and call statistic methods on the
/// returned series. Every statistic folds the shards through the reference
/// driver with this environment's parallelism.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisEnvironment {
    parallelism: usize,
}

impl AnalysisEnvironment {
    /// Create a single-threaded environment.
    pub fn new() -> Self {
        AnalysisEnvironment { parallelism: 1 }
    }

    /// Set the worker thread budget; values below 1 are clamped to 1.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Scalar-valued series, one vector of observations per shard.
    pub fn numeric_series(&self, shards: Vec<Vec<f64>>) -> NumericSeries {
        NumericSeries::new(self.parallelism, shards)
    }

    /// Fixed-width rows, row-major per shard. Fails when a shard's length
    /// is not a multiple of `width`.
    pub fn vector_series(&self, width: usize, shards: Vec<Vec<f64>>) -> anyhow::Result<VectorSeries> {
        VectorSeries::new(self.parallelism, width, shards)
    }

    /// Keys paired with scalar values, one `(keys, values)` pair per shard.
    /// Fails when a shard's key and value counts differ.
    pub fn keyed_series(&self, shards: Vec<(Vec<String>, Vec<f64>)>) -> anyhow::Result<KeyedSeries> {
        KeyedSeries::new(self.parallelism, shards)
    }
}

impl Default for AnalysisEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
