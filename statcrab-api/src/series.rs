use statcrab_core::combiner::{
    CovarianceCombiner, ElementwiseCombiner, LMomentsCombiner, MeanAndVarCombiner, PcaCombiner,
    PerKeyCombiner, QuantilesCombiner, QuantilesOptions, ReduceOp,
};
use statcrab_core::driver::{run_combiner, run_keyed};
use statcrab_core::error::CombineError;
use statcrab_core::types::{DType, KeyedBatch, Tensor, ValueBatch};

/// Location, scale, and tail weights of a series under the Tukey h-h
/// model. Both tail parameters are 0 for Gaussian-like data; a heavier
/// left or right tail pushes `h_left` or `h_right` towards 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TukeyParameters {
    pub location: f64,
    pub scale: f64,
    pub h_left: f64,
    pub h_right: f64,
}

// ============================================================================
// NumericSeries
// ============================================================================

/// A distributed series of scalar observations, one `Vec<f64>` per shard.
///
/// Created by [`crate::AnalysisEnvironment::numeric_series`]. Each
/// statistic runs one combiner over the shards through the reference
/// driver.
pub struct NumericSeries {
    parallelism: usize,
    shards: Vec<ValueBatch>,
}

impl NumericSeries {
    pub(crate) fn new(parallelism: usize, shards: Vec<Vec<f64>>) -> Self {
        NumericSeries {
            parallelism,
            shards: shards.into_iter().map(ValueBatch::from_scalars).collect(),
        }
    }

    fn lanes(&self) -> Vec<Vec<ValueBatch>> {
        self.shards.iter().map(|batch| vec![batch.clone()]).collect()
    }

    /// Smallest value; the `+inf` seed for an empty series.
    pub fn min(&self) -> anyhow::Result<f64> {
        let combiner =
            ElementwiseCombiner::new(ReduceOp::Min, f64::INFINITY, vec![DType::F64], true)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        scalar_at(&out, 0)
    }

    /// Largest value; the `-inf` seed for an empty series.
    pub fn max(&self) -> anyhow::Result<f64> {
        let combiner =
            ElementwiseCombiner::new(ReduceOp::Max, f64::NEG_INFINITY, vec![DType::F64], true)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        scalar_at(&out, 0)
    }

    /// Both extremes in one pass: the minimum rides along as a negated
    /// lane under the max reduction and is negated back here.
    pub fn min_and_max(&self) -> anyhow::Result<(f64, f64)> {
        let combiner = ElementwiseCombiner::new(
            ReduceOp::Max,
            f64::NEG_INFINITY,
            vec![DType::F64, DType::F64],
            true,
        )?;
        let inputs = self
            .shards
            .iter()
            .map(|batch| vec![negated(batch), batch.clone()])
            .collect();
        let out = run_combiner(&combiner, inputs, self.parallelism)?;
        Ok((0.0 - scalar_at(&out, 0)?, scalar_at(&out, 1)?))
    }

    pub fn sum(&self) -> anyhow::Result<f64> {
        let combiner = ElementwiseCombiner::new(ReduceOp::Sum, 0.0, vec![DType::F64], true)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        scalar_at(&out, 0)
    }

    /// Number of observations, summed as a ones lane.
    pub fn size(&self) -> anyhow::Result<i64> {
        let combiner = ElementwiseCombiner::new(ReduceOp::Sum, 0.0, vec![DType::I64], true)?;
        let inputs = self
            .shards
            .iter()
            .map(|batch| vec![ValueBatch::from_scalars(vec![1.0; batch.rows()])])
            .collect();
        let out = run_combiner(&combiner, inputs, self.parallelism)?;
        Ok(scalar_at(&out, 0)? as i64)
    }

    pub fn mean(&self) -> anyhow::Result<f64> {
        Ok(self.mean_and_var()?.0)
    }

    /// Biased (population) variance.
    pub fn var(&self) -> anyhow::Result<f64> {
        Ok(self.mean_and_var()?.1)
    }

    /// Mean and biased variance in one pass; both 0 for an empty series.
    pub fn mean_and_var(&self) -> anyhow::Result<(f64, f64)> {
        let combiner = MeanAndVarCombiner::new(DType::F64, true, true, false)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        Ok((scalar_at(&out, 0)?, scalar_at(&out, 1)?))
    }

    /// `Σwx / Σw` with one weight per observation, sharded like the
    /// values.
    pub fn weighted_mean(&self, weights: Vec<Vec<f64>>) -> anyhow::Result<f64> {
        if weights.len() != self.shards.len() {
            anyhow::bail!(
                "weight shards ({}) do not match value shards ({})",
                weights.len(),
                self.shards.len()
            );
        }
        let combiner = MeanAndVarCombiner::new(DType::F64, true, false, true)?;
        let inputs = self
            .shards
            .iter()
            .zip(weights)
            .map(|(batch, w)| vec![batch.clone(), ValueBatch::from_scalars(w)])
            .collect();
        let out = run_combiner(&combiner, inputs, self.parallelism)?;
        // Weighted extraction layout: count, mean, variance, mean weight.
        scalar_at(&out, 1)
    }

    /// Fit the series to the Tukey h-h model via its first four
    /// L-moments.
    pub fn tukey_parameters(&self) -> anyhow::Result<TukeyParameters> {
        let combiner = LMomentsCombiner::new(DType::F64, true)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        Ok(TukeyParameters {
            location: scalar_at(&out, 0)?,
            scale: scalar_at(&out, 1)?,
            h_left: scalar_at(&out, 2)?,
            h_right: scalar_at(&out, 3)?,
        })
    }

    pub fn tukey_location(&self) -> anyhow::Result<f64> {
        Ok(self.tukey_parameters()?.location)
    }

    pub fn tukey_scale(&self) -> anyhow::Result<f64> {
        Ok(self.tukey_parameters()?.scale)
    }

    pub fn tukey_h_params(&self) -> anyhow::Result<(f64, f64)> {
        let params = self.tukey_parameters()?;
        Ok((params.h_left, params.h_right))
    }

    /// Exactly `num_buckets - 1` boundaries splitting the series into
    /// buckets of approximately equal weight, with rank error at most
    /// `epsilon * total weight`. An empty series yields zero-valued
    /// boundaries.
    pub fn quantiles(&self, num_buckets: usize, epsilon: f64) -> anyhow::Result<Vec<f64>> {
        let options = QuantilesOptions {
            num_quantiles: num_buckets,
            epsilon,
            output_dtype: DType::F64,
            always_return_num_quantiles: true,
            has_weights: false,
            include_max_and_min: false,
            num_features: 1,
        };
        Ok(self.quantiles_with_options(options)?.data)
    }

    /// Boundaries under explicit options, as a
    /// `[num_features, boundaries]` tensor. The series feeds one
    /// unweighted lane, so `has_weights` must stay off.
    pub fn quantiles_with_options(&self, options: QuantilesOptions) -> anyhow::Result<Tensor> {
        let combiner = QuantilesCombiner::new(options)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        single_tensor(out)
    }

    /// Count of values per bucket for sorted `boundaries`: bucket 0 is
    /// everything below `boundaries[0]`, bucket `i` is
    /// `[boundaries[i-1], boundaries[i])`, and the last bucket catches the
    /// rest. Empty buckets report 0.
    pub fn histogram(&self, boundaries: &[f64]) -> anyhow::Result<Vec<i64>> {
        if boundaries.windows(2).any(|pair| pair[0] > pair[1]) {
            anyhow::bail!("histogram boundaries must be sorted");
        }
        let combiner = PerKeyCombiner::new(ElementwiseCombiner::new(
            ReduceOp::Sum,
            0.0,
            vec![DType::I64],
            true,
        )?);
        let shards = self
            .shards
            .iter()
            .map(|batch| {
                let keys = batch
                    .values()
                    .iter()
                    .map(|&x| bucket_key(boundaries, x))
                    .collect();
                let ones = ValueBatch::from_scalars(vec![1.0; batch.rows()]);
                KeyedBatch::new(keys, vec![ones])
            })
            .collect::<Result<Vec<KeyedBatch>, CombineError>>()?;
        let per_bucket = run_keyed(&combiner, shards, self.parallelism)?;

        let mut counts = vec![0i64; boundaries.len() + 1];
        for (key, outputs) in per_bucket {
            let bucket: usize = key
                .parse()
                .map_err(|_| anyhow::anyhow!("non-numeric bucket key {key}"))?;
            counts[bucket] = scalar_at(&outputs, 0)? as i64;
        }
        Ok(counts)
    }
}

// ============================================================================
// VectorSeries
// ============================================================================

/// A distributed series of fixed-width rows, row-major per shard.
///
/// Statistics are per column unless noted otherwise.
pub struct VectorSeries {
    parallelism: usize,
    width: usize,
    shards: Vec<ValueBatch>,
}

impl VectorSeries {
    pub(crate) fn new(
        parallelism: usize,
        width: usize,
        shards: Vec<Vec<f64>>,
    ) -> anyhow::Result<Self> {
        if width == 0 {
            anyhow::bail!("vector series width must be positive");
        }
        let shards = shards
            .into_iter()
            .map(|data| ValueBatch::from_rows(width, data))
            .collect::<Result<Vec<ValueBatch>, CombineError>>()?;
        Ok(VectorSeries {
            parallelism,
            width,
            shards,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn lanes(&self) -> Vec<Vec<ValueBatch>> {
        self.shards.iter().map(|batch| vec![batch.clone()]).collect()
    }

    fn reduce(&self, op: ReduceOp, seed: f64) -> anyhow::Result<Vec<f64>> {
        let combiner = ElementwiseCombiner::new(op, seed, vec![DType::F64], false)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        Ok(single_tensor(out)?.data)
    }

    /// Per-column minimum.
    pub fn min(&self) -> anyhow::Result<Vec<f64>> {
        self.reduce(ReduceOp::Min, f64::INFINITY)
    }

    /// Per-column maximum.
    pub fn max(&self) -> anyhow::Result<Vec<f64>> {
        self.reduce(ReduceOp::Max, f64::NEG_INFINITY)
    }

    /// Per-column sum.
    pub fn sum(&self) -> anyhow::Result<Vec<f64>> {
        self.reduce(ReduceOp::Sum, 0.0)
    }

    pub fn mean(&self) -> anyhow::Result<Vec<f64>> {
        Ok(self.mean_and_var()?.0)
    }

    pub fn var(&self) -> anyhow::Result<Vec<f64>> {
        Ok(self.mean_and_var()?.1)
    }

    /// Per-column mean and biased variance in one pass.
    pub fn mean_and_var(&self) -> anyhow::Result<(Vec<f64>, Vec<f64>)> {
        let combiner = MeanAndVarCombiner::new(DType::F64, false, true, false)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        let mut tensors = out.into_iter();
        match (tensors.next(), tensors.next()) {
            (Some(mean), Some(var)) => Ok((mean.data, var.data)),
            _ => Err(anyhow::anyhow!("mean and variance extraction came up short")),
        }
    }

    /// Biased covariance matrix as a `[width, width]` tensor; all zeros
    /// for an empty series.
    pub fn covariance(&self) -> anyhow::Result<Tensor> {
        let combiner = CovarianceCombiner::new(self.width, DType::F64)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        single_tensor(out)
    }

    /// Top `output_dim` principal directions as a `[width, output_dim]`
    /// tensor, columns ordered by descending eigenvalue. An empty series
    /// yields the truncated identity basis.
    pub fn pca(&self, output_dim: usize) -> anyhow::Result<Tensor> {
        let combiner = PcaCombiner::new(self.width, output_dim, DType::F64)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        single_tensor(out)
    }

    /// Per-column boundaries as a `[width, num_buckets - 1]` tensor.
    /// Multi-column sketches require the exact-count mode, so it is always
    /// on here.
    pub fn quantiles(&self, num_buckets: usize, epsilon: f64) -> anyhow::Result<Tensor> {
        let options = QuantilesOptions {
            num_quantiles: num_buckets,
            epsilon,
            output_dtype: DType::F64,
            always_return_num_quantiles: true,
            has_weights: false,
            include_max_and_min: false,
            num_features: self.width,
        };
        let combiner = QuantilesCombiner::new(options)?;
        let out = run_combiner(&combiner, self.lanes(), self.parallelism)?;
        single_tensor(out)
    }
}

// ============================================================================
// KeyedSeries
// ============================================================================

/// Keys paired with scalar values; every statistic is computed
/// independently per distinct key and returned sorted by key.
pub struct KeyedSeries {
    parallelism: usize,
    shards: Vec<KeyedBatch>,
}

impl KeyedSeries {
    pub(crate) fn new(
        parallelism: usize,
        shards: Vec<(Vec<String>, Vec<f64>)>,
    ) -> anyhow::Result<Self> {
        let shards = shards
            .into_iter()
            .map(|(keys, values)| KeyedBatch::new(keys, vec![ValueBatch::from_scalars(values)]))
            .collect::<Result<Vec<KeyedBatch>, CombineError>>()?;
        Ok(KeyedSeries {
            parallelism,
            shards,
        })
    }

    /// Number of rows per key.
    pub fn count_per_key(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let combiner = PerKeyCombiner::new(ElementwiseCombiner::new(
            ReduceOp::Sum,
            0.0,
            vec![DType::I64],
            true,
        )?);
        let shards = self
            .shards
            .iter()
            .map(|shard| {
                let ones = ValueBatch::from_scalars(vec![1.0; shard.rows()]);
                KeyedBatch::new(shard.keys.clone(), vec![ones])
            })
            .collect::<Result<Vec<KeyedBatch>, CombineError>>()?;
        let out = run_keyed(&combiner, shards, self.parallelism)?;
        out.into_iter()
            .map(|(key, tensors)| Ok((key, scalar_at(&tensors, 0)? as i64)))
            .collect()
    }

    /// Generalized elementwise reduction per key. Only the full reduction
    /// to one scalar per key is defined: per-key accumulators are ragged
    /// across keys, so slot-wise seeds have no consistent shape and
    /// `per_slot` is rejected.
    pub fn reduce_per_key(
        &self,
        op: ReduceOp,
        per_slot: bool,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        if per_slot {
            return Err(CombineError::Configuration(
                "slot-wise elementwise reduction is not supported per key".to_string(),
            )
            .into());
        }
        let seed = match op {
            ReduceOp::Min => f64::INFINITY,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::Sum => 0.0,
        };
        let combiner =
            PerKeyCombiner::new(ElementwiseCombiner::new(op, seed, vec![DType::F64], true)?);
        let out = run_keyed(&combiner, self.shards.clone(), self.parallelism)?;
        out.into_iter()
            .map(|(key, tensors)| Ok((key, scalar_at(&tensors, 0)?)))
            .collect()
    }

    pub fn sum_per_key(&self) -> anyhow::Result<Vec<(String, f64)>> {
        self.reduce_per_key(ReduceOp::Sum, false)
    }

    pub fn min_per_key(&self) -> anyhow::Result<Vec<(String, f64)>> {
        self.reduce_per_key(ReduceOp::Min, false)
    }

    pub fn max_per_key(&self) -> anyhow::Result<Vec<(String, f64)>> {
        self.reduce_per_key(ReduceOp::Max, false)
    }

    /// Mean and biased variance per key.
    pub fn mean_and_var_per_key(&self) -> anyhow::Result<Vec<(String, (f64, f64))>> {
        let combiner =
            PerKeyCombiner::new(MeanAndVarCombiner::new(DType::F64, true, true, false)?);
        let out = run_keyed(&combiner, self.shards.clone(), self.parallelism)?;
        out.into_iter()
            .map(|(key, tensors)| {
                let mean = scalar_at(&tensors, 0)?;
                let var = scalar_at(&tensors, 1)?;
                Ok((key, (mean, var)))
            })
            .collect()
    }

    /// Approximate bucket boundaries per key, exactly `num_buckets - 1`
    /// per key.
    pub fn quantiles_per_key(
        &self,
        num_buckets: usize,
        epsilon: f64,
    ) -> anyhow::Result<Vec<(String, Vec<f64>)>> {
        let options = QuantilesOptions {
            num_quantiles: num_buckets,
            epsilon,
            output_dtype: DType::F64,
            always_return_num_quantiles: true,
            has_weights: false,
            include_max_and_min: false,
            num_features: 1,
        };
        let combiner = PerKeyCombiner::new(QuantilesCombiner::new(options)?);
        let out = run_keyed(&combiner, self.shards.clone(), self.parallelism)?;
        out.into_iter()
            .map(|(key, tensors)| {
                let boundaries = tensors
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing boundaries for key {key}"))?;
                Ok((key, boundaries.data))
            })
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn negated(batch: &ValueBatch) -> ValueBatch {
    ValueBatch::from_scalars(batch.values().iter().map(|&x| -x).collect())
}

/// Bucket index of `x`: the number of boundaries at or below it,
/// stringified as the grouping key for the per-key counter.
fn bucket_key(boundaries: &[f64], x: f64) -> String {
    let bucket = boundaries.partition_point(|&b| b <= x);
    format!("{bucket}")
}

fn scalar_at(outputs: &[Tensor], index: usize) -> anyhow::Result<f64> {
    outputs
        .get(index)
        .and_then(|tensor| tensor.as_scalar())
        .ok_or_else(|| anyhow::anyhow!("output {index} is not a scalar tensor"))
}

fn single_tensor(outputs: Vec<Tensor>) -> anyhow::Result<Tensor> {
    let mut outputs = outputs.into_iter();
    match (outputs.next(), outputs.next()) {
        (Some(tensor), None) => Ok(tensor),
        _ => Err(anyhow::anyhow!("expected exactly one output tensor")),
    }
}
