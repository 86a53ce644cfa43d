//! Core value types: declared output dtypes, dense tensors, and the batch
//! containers fed to `add_input`.

use serde::{Deserialize, Serialize};

use crate::error::{CombineError, Result};

// ============================================================================
// DType
// ============================================================================

/// Declared element type of an extraction output.
///
/// Values are carried as `f64` end to end; the declared dtype controls the
/// rounding applied by `extract_output` and which outputs a combiner accepts
/// at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I64,
    F32,
    F64,
}

impl DType {
    /// True for the floating-point dtypes. Mean/variance, L-moments,
    /// quantiles and PCA refuse integer outputs at construction.
    pub fn is_float(self) -> bool {
        !matches!(self, DType::I64)
    }

    /// Round `x` through the declared type.
    pub fn cast(self, x: f64) -> f64 {
        match self {
            DType::I64 => x.trunc(),
            DType::F32 => x as f32 as f64,
            DType::F64 => x,
        }
    }
}

// ============================================================================
// Tensor
// ============================================================================

/// Dense row-major `f64` tensor with an explicit shape.
///
/// Scalars have an empty shape and a single element. Extraction outputs and
/// elementwise sub-accumulators are both `Tensor`s; the latter rely on exact
/// `PartialEq` against the created default as part of the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn scalar(value: f64) -> Self {
        Tensor {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn full(shape: Vec<usize>, value: f64) -> Self {
        // Product of an empty shape is 1: a scalar holds one element.
        let len = shape.iter().product::<usize>();
        Tensor {
            shape,
            data: vec![value; len],
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// 1-D tensor over `data`.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Tensor {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Sole element of a scalar (or single-element) tensor.
    pub fn as_scalar(&self) -> Option<f64> {
        (self.data.len() == 1).then(|| self.data[0])
    }

    /// Copy of this tensor with every element rounded through `dtype`.
    pub fn cast(&self, dtype: DType) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| dtype.cast(x)).collect(),
        }
    }
}

// ============================================================================
// Batches
// ============================================================================

/// One rectangular, row-major input batch for a single declared input lane.
///
/// `width` is the number of values per row; scalar series use width 1. A
/// combiner receives a `Vec<ValueBatch>` per call, one entry per declared
/// lane (values first, the optional weight lane second).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBatch {
    width: usize,
    data: Vec<f64>,
}

impl ValueBatch {
    /// Width-1 batch over scalar values.
    pub fn from_scalars(values: Vec<f64>) -> Self {
        ValueBatch {
            width: 1,
            data: values,
        }
    }

    /// Row-major batch of `width`-sized rows.
    pub fn from_rows(width: usize, data: Vec<f64>) -> Result<Self> {
        if width == 0 || data.len() % width != 0 {
            return Err(CombineError::width_mismatch(
                "batch construction",
                data.len(),
                width,
            ));
        }
        Ok(ValueBatch { width, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat view of every value, row-major.
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.width)
    }

    /// Values of slot `j` across all rows.
    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().skip(j).step_by(self.width).copied()
    }
}

/// A batch with one string key per row, shared across all input lanes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedBatch {
    pub keys: Vec<String>,
    pub inputs: Vec<ValueBatch>,
}

impl KeyedBatch {
    /// Validates that every lane has exactly one row per key.
    pub fn new(keys: Vec<String>, inputs: Vec<ValueBatch>) -> Result<Self> {
        for lane in &inputs {
            if lane.rows() != keys.len() {
                return Err(CombineError::width_mismatch(
                    "keyed batch",
                    lane.rows(),
                    keys.len(),
                ));
            }
        }
        Ok(KeyedBatch { keys, inputs })
    }

    pub fn rows(&self) -> usize {
        self.keys.len()
    }
}

/// Per-key extraction result, ordered by key.
pub type KeyedOutput = Vec<(String, Vec<Tensor>)>;

// ============================================================================
// Tests
// ============================================================================
