//! # StatCrab Core
//!
//! Mergeable single-pass statistical combiners for the StatCrab analysis
//! engine.
//!
//! Every analysis implements one protocol: the [`Combiner`](combiner::Combiner)
//! trait with `create_accumulator` / `add_input` / `merge_accumulators` /
//! `extract_output`, so partial results fold across shards and workers in any
//! grouping.
//!
//! - [`types`] — Data interchange: [`Tensor`](types::Tensor),
//!   [`ValueBatch`](types::ValueBatch), [`KeyedBatch`](types::KeyedBatch),
//!   [`DType`](types::DType).
//! - [`combiner`] — The protocol plus the built-in combiners: elementwise
//!   min/max/sum, weighted mean and variance, L-moments with Tukey h-h
//!   fitting, approximate quantiles, covariance, PCA, and per-key wrapping.
//! - [`sketch`] — The shared weighted quantile summary, its kernel, and the
//!   process-wide resource cache.
//! - [`numeric`] — Normal-distribution helpers and the Tukey h-h solver.
//! - [`driver`] — Reference multi-threaded fold/merge/extract driver.
//! - [`accumulator`] — Slot padding and non-finite sanitization shared by
//!   the moment-style accumulators.
//! - [`error`] — [`CombineError`](error::CombineError) and the crate
//!   [`Result`](error::Result).

pub mod accumulator;
pub mod combiner;
pub mod driver;
pub mod error;
pub mod numeric;
pub mod sketch;
pub mod types;
