//! Numeric kernels backing the L-moments combiner: normal-distribution
//! special functions and the Tukey HH gaussianization solver.

mod gaussianization;
mod special;

pub use gaussianization::*;
pub use special::*;
