//! Sparse linear algebra for the normal equations.
//!
//! The smoother assembles the information matrix `H = Σ JᵀJ` block by block in a
//! [`HessianBuilder`], converts it to a `faer` compressed sparse column matrix and
//! factorizes it with a sparse LLᵀ. The symbolic factorization (fill-reducing
//! ordering and elimination tree) only depends on the sparsity pattern, so
//! [`SparseCholeskySolver`] keeps it for as long as the pattern does not change,
//! which covers every relinearization pass between two graph changes.
//!
//! Covariance queries never form `H⁻¹`: [`SparseCholeskyFactor::inverse_columns`]
//! solves for the requested columns only.

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, Side};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Type alias for sparse matrices using faer
pub type SparseMatrix = SparseColMat<usize, f64>;

/// Errors from factorizing or solving the normal equations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// The matrix is singular or not positive definite
    #[error("matrix is not positive definite{}", column_suffix(.column))]
    NotPositiveDefinite { column: Option<usize> },

    /// Operand shapes do not agree
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Values that are NaN or infinite reached the solver
    #[error("non-finite entries in the linear system")]
    NonFinite,

    /// The sparse structure could not be built or analyzed
    #[error("factorization failed: {0}")]
    FactorizationFailed(String),
}

fn column_suffix(column: &Option<usize>) -> String {
    match column {
        Some(column) => format!(" (column {column})"),
        None => String::new(),
    }
}

/// Symmetric matrix accumulated from dense blocks.
#[derive(Debug, Clone)]
pub struct HessianBuilder {
    dim: usize,
    /// (col, row) -> value, so iteration is column-major
    entries: BTreeMap<(usize, usize), f64>,
}

impl HessianBuilder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: BTreeMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Add `block` with its top-left corner at (`row`, `col`).
    pub fn add_block(&mut self, row: usize, col: usize, block: &DMatrix<f64>) {
        for c in 0..block.ncols() {
            for r in 0..block.nrows() {
                *self.entries.entry((col + c, row + r)).or_insert(0.0) += block[(r, c)];
            }
        }
    }

    /// First column without a non-zero entry, i.e. a variable no factor constrains.
    pub fn empty_column(&self) -> Option<usize> {
        let mut filled = vec![false; self.dim];
        for (&(col, _), value) in &self.entries {
            if col < self.dim && *value != 0.0 {
                filled[col] = true;
            }
        }
        filled.iter().position(|f| !f)
    }

    /// Compressed sparse column copy.
    pub fn build(&self) -> Result<SparseMatrix, LinAlgError> {
        if self.entries.values().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        if let Some(&(col, row)) = self
            .entries
            .keys()
            .find(|&&(col, row)| col >= self.dim || row >= self.dim)
        {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dim,
                actual: col.max(row) + 1,
            });
        }

        let triplets: Vec<Triplet<usize, usize, f64>> = self
            .entries
            .iter()
            .map(|(&(col, row), &value)| Triplet::new(row, col, value))
            .collect();
        SparseColMat::try_new_from_triplets(self.dim, self.dim, &triplets).map_err(|e| {
            LinAlgError::FactorizationFailed(format!("invalid sparse structure: {e:?}"))
        })
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.dim, self.dim);
        for (&(col, row), &value) in &self.entries {
            if col < self.dim && row < self.dim {
                dense[(row, col)] = value;
            }
        }
        dense
    }
}

/// Numeric sparse LLᵀ factorization of a symmetric positive definite matrix.
pub struct SparseCholeskyFactor {
    llt: Llt<usize, f64>,
    dim: usize,
}

impl fmt::Debug for SparseCholeskyFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseCholeskyFactor")
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

impl SparseCholeskyFactor {
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Solve `H x = rhs`.
    pub fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, LinAlgError> {
        if rhs.len() != self.dim {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dim,
                actual: rhs.len(),
            });
        }
        let b = Mat::from_fn(self.dim, 1, |i, _| rhs[i]);
        let x = self.llt.solve(&b);
        let solution = DVector::from_fn(self.dim, |i, _| x[(i, 0)]);
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        Ok(solution)
    }

    /// Columns `indices` of `H⁻¹`, one output column per index.
    pub fn inverse_columns(&self, indices: &[usize]) -> Result<DMatrix<f64>, LinAlgError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.dim) {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dim,
                actual: index + 1,
            });
        }
        let mut b = Mat::<f64>::zeros(self.dim, indices.len());
        for (j, &i) in indices.iter().enumerate() {
            b[(i, j)] = 1.0;
        }
        let x = self.llt.solve(&b);
        let columns = DMatrix::from_fn(self.dim, indices.len(), |r, c| x[(r, c)]);
        if columns.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFinite);
        }
        Ok(columns)
    }
}

#[derive(Clone)]
struct CachedSymbolic {
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    llt: SymbolicLlt<usize>,
}

/// Sparse Cholesky solver that reuses the symbolic factorization of an
/// unchanged sparsity pattern.
#[derive(Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic: Option<CachedSymbolic>,
}

impl fmt::Debug for SparseCholeskySolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseCholeskySolver")
            .field(
                "cached_columns",
                &self
                    .symbolic
                    .as_ref()
                    .map(|s| s.col_ptr.len().saturating_sub(1)),
            )
            .finish()
    }
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a symbolic factorization is cached.
    pub fn has_symbolic(&self) -> bool {
        self.symbolic.is_some()
    }

    pub fn factorize(&mut self, matrix: &SparseMatrix) -> Result<SparseCholeskyFactor, LinAlgError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(LinAlgError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            });
        }
        let symbolic = self.symbolic_for(matrix)?;
        let llt = Llt::try_new_with_symbolic(symbolic, matrix.as_ref(), Side::Lower)
            .map_err(|_| LinAlgError::NotPositiveDefinite { column: None })?;
        Ok(SparseCholeskyFactor {
            llt,
            dim: matrix.nrows(),
        })
    }

    /// Solve `matrix * x = rhs`.
    pub fn solve(
        &mut self,
        matrix: &SparseMatrix,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinAlgError> {
        self.factorize(matrix)?.solve(rhs)
    }

    fn symbolic_for(&mut self, matrix: &SparseMatrix) -> Result<SymbolicLlt<usize>, LinAlgError> {
        let pattern = matrix.symbolic();
        if let Some(cached) = &self.symbolic {
            if cached.col_ptr.as_slice() == pattern.col_ptr()
                && cached.row_idx.as_slice() == pattern.row_idx()
            {
                return Ok(cached.llt.clone());
            }
        }

        let llt = SymbolicLlt::try_new(pattern, Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed(format!("symbolic Cholesky failed: {e:?}"))
        })?;
        self.symbolic = Some(CachedSymbolic {
            col_ptr: pattern.col_ptr().to_vec(),
            row_idx: pattern.row_idx().to_vec(),
            llt: llt.clone(),
        });
        Ok(llt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn builder(dense: &DMatrix<f64>) -> HessianBuilder {
        let mut h = HessianBuilder::new(dense.nrows());
        h.add_block(0, 0, dense);
        h
    }

    #[test]
    fn test_solve_spd_system() {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let g = DVector::from_vec(vec![1.0, 2.0]);

        let matrix = builder(&h).build().unwrap();
        let x = SparseCholeskySolver::new().solve(&matrix, &g).unwrap();
        assert_relative_eq!(h * x, g, epsilon = 1e-12);
    }

    #[test]
    fn test_blocks_accumulate() {
        let mut h = HessianBuilder::new(3);
        h.add_block(0, 0, &DMatrix::identity(2, 2));
        h.add_block(1, 1, &DMatrix::identity(2, 2));
        let dense = h.to_dense();
        assert_relative_eq!(dense[(1, 1)], 2.0);
        assert_relative_eq!(dense[(2, 2)], 1.0);
        assert_relative_eq!(dense[(0, 2)], 0.0);
        assert_eq!(h.nnz(), 7);
    }

    #[test]
    fn test_empty_column_is_reported() {
        let h = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(builder(&h).empty_column(), Some(1));
        assert_eq!(builder(&DMatrix::identity(3, 3)).empty_column(), None);
    }

    #[test]
    fn test_rank_deficient_matrix_is_rejected() {
        // Two identical rows: rank one.
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let matrix = builder(&h).build().unwrap();
        let result = SparseCholeskySolver::new().factorize(&matrix);
        assert!(matches!(
            result,
            Err(LinAlgError::NotPositiveDefinite { .. })
        ));
    }

    #[test]
    fn test_inverse_columns() {
        let h = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 4.0]);
        let matrix = builder(&h).build().unwrap();
        let factor = SparseCholeskySolver::new().factorize(&matrix).unwrap();

        let columns = factor.inverse_columns(&[2, 0]).unwrap();
        assert_eq!(columns.shape(), (3, 2));
        assert_relative_eq!(columns[(2, 0)], 0.25);
        assert_relative_eq!(columns[(0, 1)], 0.5);
        assert_relative_eq!(columns[(1, 0)], 0.0);
        assert!(factor.inverse_columns(&[3]).is_err());
    }

    #[test]
    fn test_symbolic_factorization_follows_pattern() {
        let mut solver = SparseCholeskySolver::new();
        assert!(!solver.has_symbolic());

        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DMatrix::from_row_slice(2, 2, &[5.0, -2.0, -2.0, 6.0]);
        let rhs = DVector::from_vec(vec![1.0, -1.0]);

        let x = solver.solve(&builder(&a).build().unwrap(), &rhs).unwrap();
        assert!(solver.has_symbolic());
        assert_relative_eq!(&a * x, rhs, epsilon = 1e-12);

        // Same pattern, new values
        let x = solver.solve(&builder(&b).build().unwrap(), &rhs).unwrap();
        assert_relative_eq!(&b * x, rhs, epsilon = 1e-12);

        // New pattern
        let c = DMatrix::from_row_slice(3, 3, &[3.0, 0.0, 1.0, 0.0, 2.0, 0.0, 1.0, 0.0, 2.0]);
        let rhs = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let x = solver.solve(&builder(&c).build().unwrap(), &rhs).unwrap();
        assert_relative_eq!(&c * x, rhs, epsilon = 1e-12);
    }

    #[test]
    fn test_error_display() {
        let error = LinAlgError::NotPositiveDefinite { column: Some(2) };
        assert_eq!(error.to_string(), "matrix is not positive definite (column 2)");
        let error = LinAlgError::NotPositiveDefinite { column: None };
        assert_eq!(error.to_string(), "matrix is not positive definite");
    }
}
