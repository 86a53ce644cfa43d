//! Error taxonomy shared by combiner construction and the fold/merge protocol.

use thiserror::Error;

use crate::types::DType;

pub type Result<T> = std::result::Result<T, CombineError>;

/// Failure modes of the combiner protocol.
///
/// Degenerate data is deliberately not represented here: zero counts, empty
/// batches and merges of identity accumulators all extract the documented
/// fallback outputs instead of failing.
#[derive(Debug, Error)]
pub enum CombineError {
    /// The declared output dtype is not supported by this combiner.
    #[error("{operation} does not support output dtype {dtype:?}")]
    TypeMismatch {
        operation: &'static str,
        dtype: DType,
    },

    /// Two shapes that must agree (possibly after zero-padding) do not.
    #[error("{context}: cannot reconcile shapes {left:?} and {right:?}")]
    ShapeMismatch {
        context: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// Rejected option combination at construction time.
    #[error("invalid combiner configuration: {0}")]
    Configuration(String),

    /// Accumulator encode/decode failure in the caching layer.
    #[error("accumulator codec failure: {0}")]
    Codec(#[from] bincode::Error),

    /// The shared sketch resource or its cache is unusable.
    #[error("sketch resource unavailable: {0}")]
    Resource(String),
}

impl CombineError {
    /// Shorthand for the common 1-D case where only widths diverge.
    pub(crate) fn width_mismatch(context: &'static str, left: usize, right: usize) -> Self {
        CombineError::ShapeMismatch {
            context,
            left: vec![left],
            right: vec![right],
        }
    }
}
