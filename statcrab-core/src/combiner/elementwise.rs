//! Elementwise lane reductions: min, max, and sum.

use serde::{Deserialize, Serialize};

use crate::combiner::Combiner;
use crate::error::{CombineError, Result};
use crate::types::{DType, Tensor, ValueBatch};

/// The reduction applied across rows and across accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

impl ReduceOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }

    fn fold(self, column: impl Iterator<Item = f64>, seed: f64) -> f64 {
        column.fold(seed, |acc, x| self.apply(acc, x))
    }
}

/// Reduces each input lane elementwise with one [`ReduceOp`].
///
/// With `reduce_full` every lane collapses to a scalar; otherwise rows are
/// reduced slot by slot, keeping one value per column. Minimum and maximum
/// over the same stream are served by one instance with a negated lane
/// alongside the plain one, both under [`ReduceOp::Max`].
#[derive(Debug, Clone)]
pub struct ElementwiseCombiner {
    op: ReduceOp,
    default_value: f64,
    output_dtypes: Vec<DType>,
    reduce_full: bool,
}

impl ElementwiseCombiner {
    pub fn new(
        op: ReduceOp,
        default_value: f64,
        output_dtypes: Vec<DType>,
        reduce_full: bool,
    ) -> Result<Self> {
        if output_dtypes.is_empty() {
            return Err(CombineError::Configuration(
                "elementwise reduction needs at least one lane".to_string(),
            ));
        }
        Ok(ElementwiseCombiner {
            op,
            default_value,
            output_dtypes,
            reduce_full,
        })
    }

    fn num_lanes(&self) -> usize {
        self.output_dtypes.len()
    }

    fn default_tensor(&self) -> Tensor {
        Tensor::scalar(self.default_value)
    }

    /// Reduce one batch lane to a tensor: a scalar under `reduce_full`,
    /// else one value per slot.
    fn reduce_batch(&self, batch: &ValueBatch) -> Tensor {
        if self.reduce_full {
            let folded = self.op.fold(batch.values().iter().copied(), self.default_value);
            Tensor::scalar(folded)
        } else {
            let data = (0..batch.width())
                .map(|j| self.op.fold(batch.column(j), self.default_value))
                .collect();
            Tensor::from_vec(data)
        }
    }

    /// Fold `incoming` into `current`, replacing an untouched default
    /// wholesale. Shape divergence between two touched tensors is an error:
    /// padding a min/max accumulator would corrupt the result.
    fn combine_tensors(&self, current: Tensor, incoming: &Tensor) -> Result<Tensor> {
        if current == self.default_tensor() {
            return Ok(incoming.clone());
        }
        if current.shape != incoming.shape {
            return Err(CombineError::ShapeMismatch {
                context: "elementwise reduction",
                left: current.shape,
                right: incoming.shape.clone(),
            });
        }
        let data = current
            .data
            .iter()
            .zip(&incoming.data)
            .map(|(&a, &b)| self.op.apply(a, b))
            .collect();
        Ok(Tensor {
            shape: current.shape,
            data,
        })
    }
}

impl Combiner for ElementwiseCombiner {
    type Input = Vec<ValueBatch>;
    type Accumulator = Vec<Tensor>;
    type Output = Vec<Tensor>;

    fn create_accumulator(&self) -> Vec<Tensor> {
        vec![self.default_tensor(); self.num_lanes()]
    }

    fn add_input(&self, accumulator: Vec<Tensor>, input: &Vec<ValueBatch>) -> Result<Vec<Tensor>> {
        if input.len() != self.num_lanes() {
            return Err(CombineError::width_mismatch(
                "elementwise lanes",
                input.len(),
                self.num_lanes(),
            ));
        }
        accumulator
            .into_iter()
            .zip(input)
            .map(|(current, batch)| self.combine_tensors(current, &self.reduce_batch(batch)))
            .collect()
    }

    fn merge_accumulators(&self, accumulators: Vec<Vec<Tensor>>) -> Result<Vec<Tensor>> {
        // Accumulators whose first lane never left the default carry no
        // observations; merging only defaults keeps the seeds.
        let mut survivors = accumulators
            .into_iter()
            .filter(|acc| acc.first() != Some(&self.default_tensor()));
        let Some(first) = survivors.next() else {
            return Ok(self.create_accumulator());
        };
        survivors.try_fold(first, |merged, acc| {
            merged
                .into_iter()
                .zip(acc)
                .map(|(current, incoming)| self.combine_tensors(current, &incoming))
                .collect()
        })
    }

    fn extract_output(&self, accumulator: Vec<Tensor>) -> Result<Vec<Tensor>> {
        Ok(accumulator
            .iter()
            .zip(&self.output_dtypes)
            .map(|(tensor, &dtype)| tensor.cast(dtype))
            .collect())
    }
}
