//! Sparse matrix operations.
//!
//! The grid's linear systems are assembled as (row, col, value) triplets and
//! converted to CSR for the iterative solvers. The matrix-vector product is
//! row-parallel.

use crate::error::{Error, Result};
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;
use rayon::prelude::*;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Builder for assembling a sparse matrix from triplets (COO format).
///
/// Duplicate (row, col) entries are summed on conversion.
#[derive(Debug, Clone)]
pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    /// Create a new triplet matrix builder.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self::with_capacity(n_rows, n_cols, 0)
    }

    /// Create with estimated capacity.
    pub fn with_capacity(n_rows: usize, n_cols: usize, nnz_estimate: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rows: Vec::with_capacity(nnz_estimate),
            cols: Vec::with_capacity(nnz_estimate),
            values: Vec::with_capacity(nnz_estimate),
        }
    }

    /// Add a value at (row, col). Exact zeros are not stored.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "Row index out of bounds");
        debug_assert!(col < self.n_cols, "Column index out of bounds");

        if value != 0.0 {
            self.rows.push(row);
            self.cols.push(col);
            self.values.push(value);
        }
    }

    /// Add half of `value` at (row, col) and half at (col, row).
    ///
    /// Assembling every off-diagonal coupling from both of its rows this way
    /// yields an exactly symmetric matrix.
    pub fn add_symmetric(&mut self, row: usize, col: usize, value: f64) {
        let half = 0.5 * value;
        self.add(row, col, half);
        self.add(col, row, half);
    }

    /// Convert to CSR format, summing duplicate entries.
    pub fn to_csr(self) -> Result<CsrMatrix> {
        use nalgebra_sparse::coo::CooMatrix;

        let coo = CooMatrix::try_from_triplets(
            self.n_rows,
            self.n_cols,
            self.rows,
            self.cols,
            self.values,
        )
        .map_err(|e| Error::Solver(format!("invalid triplet data: {}", e)))?;

        Ok(CsrMatrix::from(&coo))
    }
}

/// Dense right-hand side vector with additive assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    values: Vec<f64>,
}

impl SparseVector {
    /// Create a zero vector of given size.
    pub fn zeros(size: usize) -> Self {
        Self {
            values: vec![0.0; size],
        }
    }

    /// Add a value at the given index.
    pub fn add(&mut self, index: usize, value: f64) {
        self.values[index] += value;
    }

    /// Overwrite the value at the given index.
    pub fn set(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }

    /// Get the underlying dense vector.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Row-parallel product `out = A x`.
pub fn mul_vec(matrix: &CsrMatrix, x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(matrix.ncols(), x.len());
    debug_assert_eq!(matrix.nrows(), out.len());

    out.par_iter_mut().enumerate().for_each(|(row, value)| {
        let lane = matrix.row(row);
        *value = lane
            .col_indices()
            .iter()
            .zip(lane.values())
            .map(|(&col, &a)| a * x[col])
            .sum();
    });
}

/// Main diagonal of a square CSR matrix (zero where no entry is stored).
pub fn diagonal(matrix: &CsrMatrix) -> Vec<f64> {
    (0..matrix.nrows())
        .map(|row| {
            let lane = matrix.row(row);
            lane.col_indices()
                .iter()
                .zip(lane.values())
                .filter(|&(&col, _)| col == row)
                .map(|(_, &a)| a)
                .sum::<f64>()
        })
        .collect()
}
