//! Weighted first and second moments with a numerically stable merge.

use serde::{Deserialize, Serialize};

use crate::accumulator::{pad_to_match, sanitize_non_finite};
use crate::combiner::Combiner;
use crate::error::{CombineError, Result};
use crate::types::{DType, Tensor, ValueBatch};

/// Per-slot running moments. `weight` is the mean observation weight, 1 for
/// unweighted data. The zero-length accumulator is the identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentsAccumulator {
    pub count: Vec<f64>,
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
    pub weight: Vec<f64>,
}

impl MomentsAccumulator {
    fn with_slots(slots: usize) -> Self {
        MomentsAccumulator {
            count: vec![0.0; slots],
            mean: vec![0.0; slots],
            variance: vec![0.0; slots],
            weight: vec![0.0; slots],
        }
    }

    fn slots(&self) -> usize {
        self.count.len()
    }

    fn total_count(&self) -> f64 {
        self.count.iter().sum()
    }

    fn sanitize(&mut self, variance: bool, weighted: bool) {
        sanitize_non_finite(&mut self.count);
        sanitize_non_finite(&mut self.mean);
        if variance {
            sanitize_non_finite(&mut self.variance);
        }
        if weighted {
            sanitize_non_finite(&mut self.weight);
        }
    }

    fn pad_with(&mut self, other: &mut MomentsAccumulator) {
        pad_to_match(&mut self.count, &mut other.count);
        pad_to_match(&mut self.mean, &mut other.mean);
        pad_to_match(&mut self.variance, &mut other.variance);
        pad_to_match(&mut self.weight, &mut other.weight);
    }
}

/// Computes count, mean, variance, and mean weight per slot in one pass.
///
/// Weighted variance is unsupported: the variance update assumes unit
/// weights, so the constructor rejects the combination rather than return
/// a silently wrong spread.
#[derive(Debug, Clone)]
pub struct MeanAndVarCombiner {
    output_dtype: DType,
    reduce_full: bool,
    compute_variance: bool,
    compute_weighted: bool,
}

impl MeanAndVarCombiner {
    pub fn new(
        output_dtype: DType,
        reduce_full: bool,
        compute_variance: bool,
        compute_weighted: bool,
    ) -> Result<Self> {
        if !output_dtype.is_float() {
            return Err(CombineError::TypeMismatch {
                operation: "mean and variance",
                dtype: output_dtype,
            });
        }
        if compute_variance && compute_weighted {
            return Err(CombineError::Configuration(
                "weighted variance is unsupported".to_string(),
            ));
        }
        Ok(MeanAndVarCombiner {
            output_dtype,
            reduce_full,
            compute_variance,
            compute_weighted,
        })
    }

    fn expected_lanes(&self) -> usize {
        if self.compute_weighted {
            2
        } else {
            1
        }
    }

    /// Exact moments of one batch, one slot per column (or a single slot
    /// over everything when `reduce_full`).
    fn batch_accumulator(&self, input: &[ValueBatch]) -> Result<MomentsAccumulator> {
        let values = &input[0];
        let row_weights: Option<&ValueBatch> = self.compute_weighted.then(|| &input[1]);
        if let Some(weights) = row_weights {
            if weights.width() != 1 || weights.rows() != values.rows() {
                return Err(CombineError::width_mismatch(
                    "weight lane",
                    weights.values().len(),
                    values.rows(),
                ));
            }
        }

        let slots = if self.reduce_full { 1 } else { values.width() };
        let mut acc = MomentsAccumulator::with_slots(slots);

        for j in 0..slots {
            let column: Vec<f64> = if self.reduce_full {
                values.values().to_vec()
            } else {
                values.column(j).collect()
            };
            // Each row weight covers every value in the row.
            let weight_of = |i: usize| match row_weights {
                Some(w) => w.values()[if self.reduce_full { i / values.width() } else { i }],
                None => 1.0,
            };

            let count = column.len() as f64;
            let weight_sum: f64 = (0..column.len()).map(&weight_of).sum();
            let weighted_sum: f64 = column
                .iter()
                .enumerate()
                .map(|(i, &x)| weight_of(i) * x)
                .sum();
            // 0/0 on an empty batch stays NaN; the merge sanitizes it.
            let mean = weighted_sum / weight_sum;
            acc.count[j] = count;
            acc.mean[j] = mean;
            acc.weight[j] = weight_sum / count;
            if self.compute_variance {
                acc.variance[j] =
                    column.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / count;
            }
        }
        Ok(acc)
    }

    /// Pairwise merge after sanitizing and padding both sides. The side
    /// with the larger total count leads to keep the update stable.
    fn merge_two(
        &self,
        mut a: MomentsAccumulator,
        mut b: MomentsAccumulator,
    ) -> MomentsAccumulator {
        a.sanitize(self.compute_variance, self.compute_weighted);
        b.sanitize(self.compute_variance, self.compute_weighted);
        a.pad_with(&mut b);
        if b.total_count() > a.total_count() {
            std::mem::swap(&mut a, &mut b);
        }

        let slots = a.slots();
        let mut out = MomentsAccumulator::with_slots(slots);
        for j in 0..slots {
            let n = a.count[j] + b.count[j];
            if n == 0.0 {
                out.mean[j] = a.mean[j];
                out.variance[j] = a.variance[j];
                out.weight[j] = a.weight[j];
                continue;
            }
            let ratio = b.count[j] / n;
            let weight = a.weight[j] + ratio * (b.weight[j] - a.weight[j]);
            let mean_scale = if self.compute_weighted {
                // Zero combined weight divides through here; the NaN is
                // carried and sanitized on the next merge.
                b.count[j] * b.weight[j] / (n * weight)
            } else {
                ratio
            };
            let mean = a.mean[j] + mean_scale * (b.mean[j] - a.mean[j]);
            out.count[j] = n;
            out.mean[j] = mean;
            out.weight[j] = weight;
            if self.compute_variance {
                out.variance[j] = a.variance[j]
                    + ratio * (b.variance[j] - a.variance[j] + (b.mean[j] - mean) * (b.mean[j] - a.mean[j]));
            }
        }
        out
    }

    fn slot_tensor(&self, data: Vec<f64>) -> Tensor {
        if self.reduce_full {
            Tensor::scalar(data.first().copied().unwrap_or(0.0))
        } else {
            Tensor::from_vec(data)
        }
    }
}

impl Combiner for MeanAndVarCombiner {
    type Input = Vec<ValueBatch>;
    type Accumulator = MomentsAccumulator;
    type Output = Vec<Tensor>;

    fn create_accumulator(&self) -> MomentsAccumulator {
        MomentsAccumulator::default()
    }

    fn add_input(
        &self,
        accumulator: MomentsAccumulator,
        input: &Vec<ValueBatch>,
    ) -> Result<MomentsAccumulator> {
        if input.len() != self.expected_lanes() {
            return Err(CombineError::width_mismatch(
                "moments lanes",
                input.len(),
                self.expected_lanes(),
            ));
        }
        let batch = self.batch_accumulator(input)?;
        Ok(self.merge_two(accumulator, batch))
    }

    fn merge_accumulators(
        &self,
        accumulators: Vec<MomentsAccumulator>,
    ) -> Result<MomentsAccumulator> {
        Ok(accumulators
            .into_iter()
            .fold(self.create_accumulator(), |a, b| self.merge_two(a, b)))
    }

    fn extract_output(&self, accumulator: MomentsAccumulator) -> Result<Vec<Tensor>> {
        let mut acc = accumulator;
        if self.reduce_full && acc.slots() == 0 {
            acc = MomentsAccumulator::with_slots(1);
        }
        let dtype = self.output_dtype;
        if self.compute_variance && !self.compute_weighted {
            Ok(vec![
                self.slot_tensor(acc.mean).cast(dtype),
                self.slot_tensor(acc.variance).cast(dtype),
            ])
        } else {
            Ok(vec![
                self.slot_tensor(acc.count).cast(DType::I64),
                self.slot_tensor(acc.mean).cast(dtype),
                self.slot_tensor(acc.variance).cast(dtype),
                self.slot_tensor(acc.weight).cast(dtype),
            ])
        }
    }
}
