//! Sample L-moments and Tukey HH parameter estimation.

use serde::{Deserialize, Serialize};

use crate::accumulator::pad_to_match;
use crate::combiner::{AccumulatorCoder, Combiner};
use crate::error::{CombineError, Result};
use crate::numeric::{compute_tukey_hh_params, tukey_hh_l_mean_and_scale};
use crate::types::{DType, Tensor, ValueBatch};

/// Per-slot counted sums of the first four sample L-moments.
///
/// Each order r is an independent estimate: `count_lr` is the number of
/// r-element ordered subsets seen, `C(n, r)` summed over batches, and is
/// zero while fewer than r observations exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LMomentsAccumulator {
    pub l1: Vec<f64>,
    pub l2: Vec<f64>,
    pub l3: Vec<f64>,
    pub l4: Vec<f64>,
    pub count_l1: Vec<f64>,
    pub count_l2: Vec<f64>,
    pub count_l3: Vec<f64>,
    pub count_l4: Vec<f64>,
}

impl LMomentsAccumulator {
    fn with_slots(slots: usize) -> Self {
        LMomentsAccumulator {
            l1: vec![0.0; slots],
            l2: vec![0.0; slots],
            l3: vec![0.0; slots],
            l4: vec![0.0; slots],
            count_l1: vec![0.0; slots],
            count_l2: vec![0.0; slots],
            count_l3: vec![0.0; slots],
            count_l4: vec![0.0; slots],
        }
    }

    fn slots(&self) -> usize {
        self.l1.len()
    }

    fn pad_with(&mut self, other: &mut LMomentsAccumulator) {
        pad_to_match(&mut self.l1, &mut other.l1);
        pad_to_match(&mut self.l2, &mut other.l2);
        pad_to_match(&mut self.l3, &mut other.l3);
        pad_to_match(&mut self.l4, &mut other.l4);
        pad_to_match(&mut self.count_l1, &mut other.count_l1);
        pad_to_match(&mut self.count_l2, &mut other.count_l2);
        pad_to_match(&mut self.count_l3, &mut other.count_l3);
        pad_to_match(&mut self.count_l4, &mut other.count_l4);
    }

    fn moments(&self, j: usize) -> [(f64, f64); 4] {
        [
            (self.l1[j], self.count_l1[j]),
            (self.l2[j], self.count_l2[j]),
            (self.l3[j], self.count_l3[j]),
            (self.l4[j], self.count_l4[j]),
        ]
    }

    fn set_moment(&mut self, j: usize, order: usize, value: f64, count: f64) {
        let (values, counts) = match order {
            0 => (&mut self.l1, &mut self.count_l1),
            1 => (&mut self.l2, &mut self.count_l2),
            2 => (&mut self.l3, &mut self.count_l3),
            _ => (&mut self.l4, &mut self.count_l4),
        };
        values[j] = value;
        counts[j] = count;
    }
}

/// `C(n, r)` via the falling product, zero once any factor hits zero.
fn ordered_subset_count(n: f64, r: usize) -> f64 {
    let mut count = 1.0;
    for k in 0..r {
        count *= (n - k as f64) / (k + 1) as f64;
    }
    count.max(0.0)
}

/// Direct sample L-moments of one sorted column, with their subset counts.
fn sorted_column_l_moments(sorted: &[f64]) -> [(f64, f64); 4] {
    let n = sorted.len() as f64;
    let counts = [
        ordered_subset_count(n, 1),
        ordered_subset_count(n, 2),
        ordered_subset_count(n, 3),
        ordered_subset_count(n, 4),
    ];

    // Probability-weighted moments b_r = (1/n) Σ_i x_i · Π_{k<r} (i−k)/(n−1−k).
    let mut b = [0.0_f64; 4];
    for (i, &x) in sorted.iter().enumerate() {
        let i = i as f64;
        let mut coeff = 1.0;
        for r in 0..4 {
            if counts[r] > 0.0 {
                b[r] += coeff * x;
            }
            coeff *= (i - r as f64) / (n - 1.0 - r as f64);
        }
    }
    for br in &mut b {
        *br /= n;
    }

    [
        (if counts[0] > 0.0 { b[0] } else { 0.0 }, counts[0]),
        (
            if counts[1] > 0.0 { 2.0 * b[1] - b[0] } else { 0.0 },
            counts[1],
        ),
        (
            if counts[2] > 0.0 {
                6.0 * b[2] - 6.0 * b[1] + b[0]
            } else {
                0.0
            },
            counts[2],
        ),
        (
            if counts[3] > 0.0 {
                20.0 * b[3] - 30.0 * b[2] + 12.0 * b[1] - b[0]
            } else {
                0.0
            },
            counts[3],
        ),
    ]
}

/// Estimates per-slot L-moments and extracts Tukey HH distribution
/// parameters `[location, scale, hl, hr]`.
#[derive(Debug, Clone)]
pub struct LMomentsCombiner {
    output_dtype: DType,
    reduce_full: bool,
}

impl LMomentsCombiner {
    pub fn new(output_dtype: DType, reduce_full: bool) -> Result<Self> {
        if !output_dtype.is_float() {
            return Err(CombineError::TypeMismatch {
                operation: "tukey h-h estimation",
                dtype: output_dtype,
            });
        }
        Ok(LMomentsCombiner {
            output_dtype,
            reduce_full,
        })
    }

    fn batch_accumulator(&self, values: &ValueBatch) -> LMomentsAccumulator {
        let slots = if self.reduce_full { 1 } else { values.width() };
        let mut acc = LMomentsAccumulator::with_slots(slots);
        for j in 0..slots {
            let mut column: Vec<f64> = if self.reduce_full {
                values.values().to_vec()
            } else {
                values.column(j).collect()
            };
            column.sort_by(f64::total_cmp);
            for (order, (value, count)) in sorted_column_l_moments(&column).into_iter().enumerate()
            {
                acc.set_moment(j, order, value, count);
            }
        }
        acc
    }

    /// Count-weighted interpolation per moment order; a zero combined count
    /// keeps the left value.
    fn merge_two(
        &self,
        mut a: LMomentsAccumulator,
        mut b: LMomentsAccumulator,
    ) -> LMomentsAccumulator {
        a.pad_with(&mut b);
        let slots = a.slots();
        let mut out = LMomentsAccumulator::with_slots(slots);
        for j in 0..slots {
            let left = a.moments(j);
            let right = b.moments(j);
            for order in 0..4 {
                let (la, ca) = left[order];
                let (lb, cb) = right[order];
                let count = ca + cb;
                let value = if count == 0.0 {
                    la
                } else {
                    (ca * la + cb * lb) / count
                };
                out.set_moment(j, order, value, count);
            }
        }
        out
    }
}

impl Combiner for LMomentsCombiner {
    type Input = Vec<ValueBatch>;
    type Accumulator = LMomentsAccumulator;
    type Output = Vec<Tensor>;

    fn create_accumulator(&self) -> LMomentsAccumulator {
        LMomentsAccumulator::default()
    }

    fn add_input(
        &self,
        accumulator: LMomentsAccumulator,
        input: &Vec<ValueBatch>,
    ) -> Result<LMomentsAccumulator> {
        if input.len() != 1 {
            return Err(CombineError::width_mismatch(
                "l-moment lanes",
                input.len(),
                1,
            ));
        }
        let batch = self.batch_accumulator(&input[0]);
        Ok(self.merge_two(accumulator, batch))
    }

    fn merge_accumulators(
        &self,
        accumulators: Vec<LMomentsAccumulator>,
    ) -> Result<LMomentsAccumulator> {
        Ok(accumulators
            .into_iter()
            .fold(self.create_accumulator(), |a, b| self.merge_two(a, b)))
    }

    fn extract_output(&self, accumulator: LMomentsAccumulator) -> Result<Vec<Tensor>> {
        let mut acc = accumulator;
        if self.reduce_full && acc.slots() == 0 {
            acc = LMomentsAccumulator::with_slots(1);
        }
        let slots = acc.slots();
        let mut location = Vec::with_capacity(slots);
        let mut scale = Vec::with_capacity(slots);
        let mut hl_out = Vec::with_capacity(slots);
        let mut hr_out = Vec::with_capacity(slots);

        for j in 0..slots {
            let l1 = acc.l1[j];
            let l2 = acc.l2[j];
            // Ratios are meaningless without a positive L-scale and at
            // least one full 4-subset.
            let (skewness, kurtosis) = if l2 > 0.0 && acc.count_l4[j] > 0.0 {
                (acc.l3[j] / l2, acc.l4[j] / l2)
            } else {
                (0.0, 0.0)
            };
            let (hl, hr) = compute_tukey_hh_params(skewness, kurtosis);
            let (hh_mean, hh_scale) = tukey_hh_l_mean_and_scale(hl, hr);
            let slot_scale = if l2 > 0.0 { l2 / hh_scale } else { 1.0 };
            location.push(l1 - slot_scale * hh_mean);
            scale.push(slot_scale);
            hl_out.push(hl);
            hr_out.push(hr);
        }

        let to_tensor = |data: Vec<f64>| {
            if self.reduce_full {
                Tensor::scalar(data.first().copied().unwrap_or(0.0))
            } else {
                Tensor::from_vec(data)
            }
        };
        let dtype = self.output_dtype;
        Ok(vec![
            to_tensor(location).cast(dtype),
            to_tensor(scale).cast(dtype),
            to_tensor(hl_out).cast(dtype),
            to_tensor(hr_out).cast(dtype),
        ])
    }

    /// L-moments accumulators stay in-process and are never shipped
    /// between workers.
    fn accumulator_coder(&self) -> Option<Box<dyn AccumulatorCoder<LMomentsAccumulator>>> {
        None
    }
}
