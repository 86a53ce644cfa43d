//! Cross-slot second moments: covariance matrices and PCA projections.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::combiner::Combiner;
use crate::error::{CombineError, Result};
use crate::types::{DType, Tensor, ValueBatch};

/// Running sums for a `d`-dimensional covariance: `Σ x xᵀ` (row-major),
/// `Σ x`, and the row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceAccumulator {
    pub sum_product: Vec<f64>,
    pub sum_vectors: Vec<f64>,
    pub count: f64,
}

impl CovarianceAccumulator {
    fn new(dim: usize) -> Self {
        CovarianceAccumulator {
            sum_product: vec![0.0; dim * dim],
            sum_vectors: vec![0.0; dim],
            count: 0.0,
        }
    }

    fn observe(&mut self, row: &[f64]) {
        let dim = row.len();
        for (r, &xr) in row.iter().enumerate() {
            for (c, &xc) in row.iter().enumerate() {
                self.sum_product[r * dim + c] += xr * xc;
            }
        }
        for (slot, &x) in self.sum_vectors.iter_mut().zip(row) {
            *slot += x;
        }
        self.count += 1.0;
    }

    fn merge_from(&mut self, other: &CovarianceAccumulator) {
        for (a, b) in self.sum_product.iter_mut().zip(&other.sum_product) {
            *a += b;
        }
        for (a, b) in self.sum_vectors.iter_mut().zip(&other.sum_vectors) {
            *a += b;
        }
        self.count += other.count;
    }

    /// Biased covariance `Σxxᵀ/n − mean·meanᵀ`, zeros when nothing was
    /// observed.
    fn covariance(&self) -> Vec<f64> {
        let dim = self.sum_vectors.len();
        if self.count == 0.0 {
            return vec![0.0; dim * dim];
        }
        let n = self.count;
        let mean: Vec<f64> = self.sum_vectors.iter().map(|&s| s / n).collect();
        let mut cov = vec![0.0; dim * dim];
        for r in 0..dim {
            for c in 0..dim {
                cov[r * dim + c] = self.sum_product[r * dim + c] / n - mean[r] * mean[c];
            }
        }
        cov
    }
}

fn accumulate_rows(
    dim: usize,
    mut accumulator: CovarianceAccumulator,
    input: &[ValueBatch],
) -> Result<CovarianceAccumulator> {
    if input.len() != 1 {
        return Err(CombineError::width_mismatch("covariance lanes", input.len(), 1));
    }
    let rows = &input[0];
    if rows.width() != dim && !rows.is_empty() {
        return Err(CombineError::ShapeMismatch {
            context: "covariance rows",
            left: vec![rows.width()],
            right: vec![dim],
        });
    }
    for row in rows.iter_rows() {
        accumulator.observe(row);
    }
    Ok(accumulator)
}

fn merge_all(
    dim: usize,
    accumulators: Vec<CovarianceAccumulator>,
) -> CovarianceAccumulator {
    let mut merged = CovarianceAccumulator::new(dim);
    for accumulator in &accumulators {
        merged.merge_from(accumulator);
    }
    merged
}

/// Biased covariance matrix over fixed-width rows.
#[derive(Debug, Clone)]
pub struct CovarianceCombiner {
    dim: usize,
    output_dtype: DType,
}

impl CovarianceCombiner {
    pub fn new(dim: usize, output_dtype: DType) -> Result<Self> {
        if !output_dtype.is_float() {
            return Err(CombineError::TypeMismatch {
                operation: "covariance",
                dtype: output_dtype,
            });
        }
        if dim == 0 {
            return Err(CombineError::Configuration(
                "covariance needs at least one dimension".to_string(),
            ));
        }
        Ok(CovarianceCombiner { dim, output_dtype })
    }
}

impl Combiner for CovarianceCombiner {
    type Input = Vec<ValueBatch>;
    type Accumulator = CovarianceAccumulator;
    type Output = Vec<Tensor>;

    fn create_accumulator(&self) -> CovarianceAccumulator {
        CovarianceAccumulator::new(self.dim)
    }

    fn add_input(
        &self,
        accumulator: CovarianceAccumulator,
        input: &Vec<ValueBatch>,
    ) -> Result<CovarianceAccumulator> {
        accumulate_rows(self.dim, accumulator, input)
    }

    fn merge_accumulators(
        &self,
        accumulators: Vec<CovarianceAccumulator>,
    ) -> Result<CovarianceAccumulator> {
        Ok(merge_all(self.dim, accumulators))
    }

    fn extract_output(&self, accumulator: CovarianceAccumulator) -> Result<Vec<Tensor>> {
        let tensor = Tensor {
            shape: vec![self.dim, self.dim],
            data: accumulator.covariance(),
        };
        Ok(vec![tensor.cast(self.output_dtype)])
    }
}

/// Top-`output_dim` principal directions of the biased covariance.
#[derive(Debug, Clone)]
pub struct PcaCombiner {
    dim: usize,
    output_dim: usize,
    output_dtype: DType,
}

impl PcaCombiner {
    pub fn new(dim: usize, output_dim: usize, output_dtype: DType) -> Result<Self> {
        if !output_dtype.is_float() {
            return Err(CombineError::TypeMismatch {
                operation: "pca",
                dtype: output_dtype,
            });
        }
        if dim == 0 || output_dim == 0 || output_dim > dim {
            return Err(CombineError::Configuration(format!(
                "pca output dimension {output_dim} must lie in 1..={dim}"
            )));
        }
        Ok(PcaCombiner {
            dim,
            output_dim,
            output_dtype,
        })
    }
}

impl Combiner for PcaCombiner {
    type Input = Vec<ValueBatch>;
    type Accumulator = CovarianceAccumulator;
    type Output = Vec<Tensor>;

    fn create_accumulator(&self) -> CovarianceAccumulator {
        CovarianceAccumulator::new(self.dim)
    }

    fn add_input(
        &self,
        accumulator: CovarianceAccumulator,
        input: &Vec<ValueBatch>,
    ) -> Result<CovarianceAccumulator> {
        accumulate_rows(self.dim, accumulator, input)
    }

    fn merge_accumulators(
        &self,
        accumulators: Vec<CovarianceAccumulator>,
    ) -> Result<CovarianceAccumulator> {
        Ok(merge_all(self.dim, accumulators))
    }

    fn extract_output(&self, accumulator: CovarianceAccumulator) -> Result<Vec<Tensor>> {
        let (d, k) = (self.dim, self.output_dim);
        let mut directions = vec![0.0; d * k];
        if accumulator.count == 0.0 {
            // Nothing observed: fall back to the leading identity columns.
            for col in 0..k {
                directions[col * k + col] = 1.0;
            }
        } else {
            let cov = DMatrix::from_row_slice(d, d, &accumulator.covariance());
            let eigen = cov.symmetric_eigen();
            let mut order: Vec<usize> = (0..d).collect();
            order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
            for (out_col, &col) in order.iter().take(k).enumerate() {
                for r in 0..d {
                    directions[r * k + out_col] = eigen.eigenvectors[(r, col)];
                }
            }
        }
        let tensor = Tensor {
            shape: vec![d, k],
            data: directions,
        };
        Ok(vec![tensor.cast(self.output_dtype)])
    }
}
