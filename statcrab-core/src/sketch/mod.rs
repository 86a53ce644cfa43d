//! ε-approximate weighted quantile sketching.
//!
//! [`summary`] holds the mergeable rank summaries; [`resource`] the shared
//! lock-protected kernels and their process-wide cache.

mod resource;
mod summary;

pub use resource::*;
pub use summary::*;

#[cfg(test)]
#[path = "tests/sketch_tests.rs"]
mod tests;
