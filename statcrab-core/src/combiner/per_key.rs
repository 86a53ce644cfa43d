//! Lifts any unkeyed combiner over batches with one string key per row.

use std::collections::BTreeMap;

use crate::combiner::{AccumulatorCoder, BincodeCoder, Combiner};
use crate::error::Result;
use crate::types::{KeyedBatch, KeyedOutput, Tensor, ValueBatch};

/// Runs one inner accumulator per distinct key.
///
/// The accumulator is an ordered map so extraction and serialization are
/// deterministic regardless of arrival order.
#[derive(Debug, Clone)]
pub struct PerKeyCombiner<C> {
    inner: C,
}

impl<C> PerKeyCombiner<C>
where
    C: Combiner<Input = Vec<ValueBatch>, Output = Vec<Tensor>>,
{
    pub fn new(inner: C) -> Self {
        PerKeyCombiner { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C> Combiner for PerKeyCombiner<C>
where
    C: Combiner<Input = Vec<ValueBatch>, Output = Vec<Tensor>>,
{
    type Input = KeyedBatch;
    type Accumulator = BTreeMap<String, C::Accumulator>;
    type Output = KeyedOutput;

    fn create_accumulator(&self) -> Self::Accumulator {
        BTreeMap::new()
    }

    fn add_input(
        &self,
        mut accumulator: Self::Accumulator,
        input: &KeyedBatch,
    ) -> Result<Self::Accumulator> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, key) in input.keys.iter().enumerate() {
            groups.entry(key).or_default().push(i);
        }
        for (key, row_indices) in groups {
            let lanes = input
                .inputs
                .iter()
                .map(|lane| {
                    let mut data = Vec::with_capacity(row_indices.len() * lane.width());
                    for &i in &row_indices {
                        data.extend_from_slice(lane.row(i));
                    }
                    ValueBatch::from_rows(lane.width(), data)
                })
                .collect::<Result<Vec<ValueBatch>>>()?;
            let current = accumulator
                .remove(key)
                .unwrap_or_else(|| self.inner.create_accumulator());
            accumulator.insert(key.to_string(), self.inner.add_input(current, &lanes)?);
        }
        Ok(accumulator)
    }

    fn merge_accumulators(
        &self,
        accumulators: Vec<Self::Accumulator>,
    ) -> Result<Self::Accumulator> {
        let mut grouped: BTreeMap<String, Vec<C::Accumulator>> = BTreeMap::new();
        for accumulator in accumulators {
            for (key, value) in accumulator {
                grouped.entry(key).or_default().push(value);
            }
        }
        let mut merged = BTreeMap::new();
        for (key, mut values) in grouped {
            // A key seen on one side only carries over untouched.
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                self.inner.merge_accumulators(values)?
            };
            merged.insert(key, value);
        }
        Ok(merged)
    }

    fn extract_output(&self, accumulator: Self::Accumulator) -> Result<Self::Output> {
        accumulator
            .into_iter()
            .map(|(key, value)| Ok((key, self.inner.extract_output(value)?)))
            .collect()
    }

    fn accumulator_coder(&self) -> Option<Box<dyn AccumulatorCoder<Self::Accumulator>>> {
        // Transportable exactly when the inner accumulator is.
        self.inner
            .accumulator_coder()
            .map(|_| Box::new(BincodeCoder::default()) as Box<dyn AccumulatorCoder<Self::Accumulator>>)
    }
}
