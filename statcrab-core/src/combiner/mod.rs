//! The combiner protocol and its implementations.
//!
//! A [`Combiner`] folds value batches into a mergeable accumulator in a
//! single pass: shards accumulate independently, accumulators merge
//! associatively, and one final extraction produces the statistic.
//!
//! Implementations:
//! - [`ElementwiseCombiner`] for slot-wise min/max/sum reductions
//! - [`MeanAndVarCombiner`] for first and second moments
//! - [`LMomentsCombiner`] for L-moments and Tukey HH tail parameters
//! - [`QuantilesCombiner`] for ε-approximate quantile boundaries
//! - [`CovarianceCombiner`] and [`PcaCombiner`] for cross-slot structure
//! - [`PerKeyCombiner`] lifting any of the above over keyed batches

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

mod covariance;
mod elementwise;
mod lmoments;
mod moments;
mod per_key;
mod quantiles;

pub use covariance::*;
pub use elementwise::*;
pub use lmoments::*;
pub use moments::*;
pub use per_key::*;
pub use quantiles::*;

#[cfg(test)]
#[path = "tests/combiner_tests.rs"]
mod tests;

/// Everything an accumulator needs to cross shard boundaries: cloneable,
/// sendable, and serde-serializable for the wire coder.
pub trait AccumulatorState: Clone + Send + Serialize + DeserializeOwned + 'static {}

impl<T> AccumulatorState for T where T: Clone + Send + Serialize + DeserializeOwned + 'static {}

/// Serializes accumulators for transport between shards.
pub trait AccumulatorCoder<A>: Send + Sync {
    fn encode(&self, accumulator: &A) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<A>;
}

/// Default coder: compact bincode over the accumulator's serde impls.
pub struct BincodeCoder<A> {
    _marker: PhantomData<fn() -> A>,
}

impl<A> Default for BincodeCoder<A> {
    fn default() -> Self {
        BincodeCoder {
            _marker: PhantomData,
        }
    }
}

impl<A: AccumulatorState> AccumulatorCoder<A> for BincodeCoder<A> {
    fn encode(&self, accumulator: &A) -> Result<Vec<u8>> {
        Ok(bincode::serialize(accumulator)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<A> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A single-pass, mergeable aggregation.
///
/// Contract:
/// - `merge_accumulators(vec![])` behaves like `create_accumulator()`;
/// - merging is associative and commutative up to floating-point
///   reassociation, so shard order never changes the statistic;
/// - `extract_output(create_accumulator())` is the statistic of an empty
///   stream, never an error.
pub trait Combiner: Send + Sync {
    type Input: Send;
    type Accumulator: AccumulatorState;
    type Output: Send;

    /// The identity accumulator, observing nothing.
    fn create_accumulator(&self) -> Self::Accumulator;

    /// Fold one input batch into the accumulator. Takes the accumulator by
    /// value; implementations update in place and hand it back.
    fn add_input(
        &self,
        accumulator: Self::Accumulator,
        input: &Self::Input,
    ) -> Result<Self::Accumulator>;

    /// Collapse several shard accumulators into one.
    fn merge_accumulators(
        &self,
        accumulators: Vec<Self::Accumulator>,
    ) -> Result<Self::Accumulator>;

    /// Turn the final accumulator into the statistic.
    fn extract_output(&self, accumulator: Self::Accumulator) -> Result<Self::Output>;

    /// Coder used to ship accumulators between shards. `None` opts out of
    /// transport, pinning the accumulator to in-process hand-off.
    fn accumulator_coder(&self) -> Option<Box<dyn AccumulatorCoder<Self::Accumulator>>> {
        Some(Box::new(BincodeCoder::default()))
    }
}
