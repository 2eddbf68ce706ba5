//! `Matrix` — a two-dimensional matrix of reals.
//!
//! A thin newtype around `nalgebra::DMatrix<f64>` carrying just the surface
//! the demographic frames and the likelihood engine need: indexing,
//! matrix-vector products (plain and transposed), row/column sums, and the
//! bilinear form used by the approximate aggregate coalescence rate.

use crate::array::Array;
use nalgebra::DMatrix;
use phylo_core::Real;
use std::ops::{Index, IndexMut};

/// A dynamically-sized 2D matrix of `Real` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix(DMatrix<Real>);

impl Matrix {
    /// Create a zero-filled `rows × cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self(DMatrix::zeros(rows, cols))
    }

    /// Create from a row-major data slice.
    pub fn from_row_slice(rows: usize, cols: usize, data: &[Real]) -> Self {
        Self(DMatrix::from_row_slice(rows, cols, data))
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.0.nrows()
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.0.ncols()
    }

    /// Return `true` if every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// Sum of row `i`.
    pub fn row_sum(&self, i: usize) -> Real {
        self.0.row(i).sum()
    }

    /// Sum of column `j`.
    pub fn col_sum(&self, j: usize) -> Real {
        self.0.column(j).sum()
    }

    /// Matrix-vector product `M · v`.
    pub fn mul_vec(&self, v: &Array) -> Array {
        Array::from(&self.0 * v.inner())
    }

    /// Bilinear form `xᵀ · M · y`.
    pub fn bilinear(&self, x: &Array, y: &Array) -> Real {
        let mut acc = 0.0;
        for i in 0..self.rows() {
            for j in 0..self.cols() {
                acc += x[i] * self.0[(i, j)] * y[j];
            }
        }
        acc
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = Real;
    fn index(&self, ij: (usize, usize)) -> &Real {
        &self.0[ij]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, ij: (usize, usize)) -> &mut Real {
        &mut self.0[ij]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Matrix {
        Matrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0])
    }

    #[test]
    fn indexing_and_sums() {
        let m = sample();
        assert_eq!(m[(0, 1)], 2.0);
        assert_eq!(m.row_sum(1), 7.0);
        assert_eq!(m.col_sum(0), 4.0);
    }

    #[test]
    fn products() {
        let m = sample();
        let v = Array::from_slice(&[1.0, 1.0]);
        let mv = m.mul_vec(&v);
        assert_eq!(mv.as_slice(), &[3.0, 7.0]);
    }

    #[test]
    fn bilinear_form() {
        let m = sample();
        let x = Array::from_slice(&[1.0, 0.0]);
        let y = Array::from_slice(&[0.0, 1.0]);
        // xᵀ M y picks out M[0][1].
        assert_eq!(m.bilinear(&x, &y), 2.0);
    }
}
