//! ε-approximate quantile boundaries over a shared sketch kernel.

use std::sync::{Arc, OnceLock};

use crate::combiner::Combiner;
use crate::error::{CombineError, Result};
use crate::sketch::{QuantileSketch, ResourceCache, ResourceKey, SketchOptions, SketchResource};
use crate::types::{DType, Tensor, ValueBatch};

/// Sketches merged per lock acquisition, bounding lock hold time.
const MERGE_CHUNK: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct QuantilesOptions {
    /// Number of buckets; the combiner emits the internal boundaries.
    pub num_quantiles: usize,
    /// Rank error budget as a fraction of total weight.
    pub epsilon: f64,
    pub output_dtype: DType,
    /// Force exactly `num_quantiles - 1` boundaries per feature instead of
    /// the compress-driven variable count.
    pub always_return_num_quantiles: bool,
    pub has_weights: bool,
    /// Keep the extreme boundaries instead of pruning them.
    pub include_max_and_min: bool,
    /// One sketch per column when > 1 (elementwise mode).
    pub num_features: usize,
}

/// Streams weighted values through a shared [`SketchResource`] and extracts
/// per-feature bucket boundaries.
///
/// The resource is resolved lazily on first use and retained for the
/// combiner's lifetime; instances agreeing on shape share kernels.
#[derive(Debug)]
pub struct QuantilesCombiner {
    options: QuantilesOptions,
    slot: u8,
    resource: OnceLock<Arc<SketchResource>>,
}

impl QuantilesCombiner {
    pub fn new(options: QuantilesOptions) -> Result<Self> {
        if !options.output_dtype.is_float() {
            return Err(CombineError::TypeMismatch {
                operation: "quantiles",
                dtype: options.output_dtype,
            });
        }
        if options.num_quantiles == 0 {
            return Err(CombineError::Configuration(
                "quantiles needs at least one bucket".to_string(),
            ));
        }
        if !(options.epsilon > 0.0) {
            return Err(CombineError::Configuration(format!(
                "quantile epsilon must be positive, got {}",
                options.epsilon
            )));
        }
        if options.num_features == 0 {
            return Err(CombineError::Configuration(
                "quantiles needs at least one feature".to_string(),
            ));
        }
        if options.num_features > 1 && !options.always_return_num_quantiles {
            return Err(CombineError::Configuration(
                "elementwise quantiles require a fixed boundary count".to_string(),
            ));
        }
        let slot = ResourceCache::global().assign_slot();
        Ok(QuantilesCombiner {
            options,
            slot,
            resource: OnceLock::new(),
        })
    }

    pub fn options(&self) -> &QuantilesOptions {
        &self.options
    }

    fn resource(&self) -> Result<&Arc<SketchResource>> {
        if let Some(resource) = self.resource.get() {
            return Ok(resource);
        }
        let key = ResourceKey {
            num_quantiles: self.options.num_quantiles,
            num_features: self.options.num_features,
            slot: self.slot,
        };
        let sketch_options = SketchOptions {
            num_quantiles: self.options.num_quantiles,
            epsilon: self.options.epsilon,
            num_features: self.options.num_features,
        };
        let resolved = ResourceCache::global().resolve(key, sketch_options)?;
        Ok(self.resource.get_or_init(|| resolved))
    }

    /// Split the value lane into per-feature columns with one weight per
    /// value. A single feature flattens the whole batch; multiple features
    /// take one column each.
    fn feature_columns(
        &self,
        values: &ValueBatch,
        row_weights: Option<&ValueBatch>,
    ) -> Result<Vec<(Vec<f64>, Vec<f64>)>> {
        if let Some(weights) = row_weights {
            if weights.width() != 1 || weights.rows() != values.rows() {
                return Err(CombineError::width_mismatch(
                    "quantile weight lane",
                    weights.values().len(),
                    values.rows(),
                ));
            }
        }
        let weight_of = |row: usize| row_weights.map_or(1.0, |w| w.values()[row]);

        let nf = self.options.num_features;
        if nf == 1 {
            let values_flat = values.values().to_vec();
            let weights_flat = (0..values_flat.len())
                .map(|i| weight_of(i / values.width()))
                .collect();
            return Ok(vec![(values_flat, weights_flat)]);
        }
        if values.width() != nf {
            return Err(CombineError::ShapeMismatch {
                context: "elementwise quantiles",
                left: vec![values.width()],
                right: vec![nf],
            });
        }
        let weights_column: Vec<f64> = (0..values.rows()).map(weight_of).collect();
        Ok((0..nf)
            .map(|j| (values.column(j).collect(), weights_column.clone()))
            .collect())
    }

    fn prune(&self, mut boundaries: Vec<f64>) -> Vec<f64> {
        let o = &self.options;
        if o.include_max_and_min {
            return boundaries;
        }
        let drop_first = o.always_return_num_quantiles || boundaries.len() >= o.num_quantiles;
        let drop_last = o.always_return_num_quantiles || boundaries.len() >= o.num_quantiles + 1;
        if drop_last && !boundaries.is_empty() {
            boundaries.pop();
        }
        if drop_first && !boundaries.is_empty() {
            boundaries.remove(0);
        }
        boundaries
    }
}

impl Combiner for QuantilesCombiner {
    type Input = Vec<ValueBatch>;
    type Accumulator = QuantileSketch;
    type Output = Vec<Tensor>;

    fn create_accumulator(&self) -> QuantileSketch {
        QuantileSketch::empty(self.options.num_features)
    }

    fn add_input(
        &self,
        accumulator: QuantileSketch,
        input: &Vec<ValueBatch>,
    ) -> Result<QuantileSketch> {
        let expected = if self.options.has_weights { 2 } else { 1 };
        if input.len() != expected {
            return Err(CombineError::width_mismatch(
                "quantile lanes",
                input.len(),
                expected,
            ));
        }
        let row_weights = self.options.has_weights.then(|| &input[1]);
        let columns = self.feature_columns(&input[0], row_weights)?;

        let mut kernel = self.resource()?.lock()?;
        kernel.reset();
        kernel.ingest_sketch(&accumulator);
        for (feature, (values, weights)) in columns.iter().enumerate() {
            kernel.ingest_column(feature, values, weights);
        }
        Ok(kernel.flush())
    }

    fn merge_accumulators(&self, accumulators: Vec<QuantileSketch>) -> Result<QuantileSketch> {
        if accumulators.is_empty() {
            return Ok(self.create_accumulator());
        }
        let resource = self.resource()?;
        let mut merged = self.create_accumulator();
        for chunk in accumulators.chunks(MERGE_CHUNK) {
            let mut kernel = resource.lock()?;
            kernel.reset();
            kernel.ingest_sketch(&merged);
            for sketch in chunk {
                kernel.ingest_sketch(sketch);
            }
            merged = kernel.flush();
        }
        Ok(merged)
    }

    fn extract_output(&self, accumulator: QuantileSketch) -> Result<Vec<Tensor>> {
        let o = &self.options;
        if accumulator.is_empty() {
            let width = if o.always_return_num_quantiles {
                o.num_quantiles - 1
            } else {
                0
            };
            return Ok(vec![Tensor::zeros(vec![o.num_features, width])]);
        }

        let (num_buckets, generate) = if o.always_return_num_quantiles {
            (o.num_quantiles + 1, true)
        } else {
            (o.num_quantiles, false)
        };
        let per_feature = {
            let mut kernel = self.resource()?.lock()?;
            kernel.boundaries(&accumulator, num_buckets, generate)
        };

        let rows: Vec<Vec<f64>> = per_feature.into_iter().map(|b| self.prune(b)).collect();
        let width = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(o.num_features * width);
        for row in rows {
            data.extend(row);
        }
        let tensor = Tensor {
            shape: vec![o.num_features, width],
            data,
        };
        Ok(vec![tensor.cast(o.output_dtype)])
    }
}
