//! Dense row-major square matrices of `f64`.

/// A square `dim × dim` matrix stored row-major in one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    dim: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Cell count of a `dim × dim` matrix, `None` if it overflows `usize`.
    #[inline]
    pub fn cells(dim: usize) -> Option<usize> {
        dim.checked_mul(dim)
    }

    fn checked_cells(dim: usize) -> usize {
        match Self::cells(dim) {
            Some(cells) => cells,
            None => panic!("matrix dimension {} overflows the cell count", dim),
        }
    }

    /// All-zero matrix.
    ///
    /// # Panics
    ///
    /// If `dim * dim` overflows `usize`.
    pub fn zeroed(dim: usize) -> Self {
        Matrix {
            dim,
            data: vec![0.0; Self::checked_cells(dim)],
        }
    }

    /// Matrix with `f(row, col)` in every cell.
    ///
    /// # Panics
    ///
    /// If `dim * dim` overflows `usize`.
    pub fn from_fn(dim: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(Self::checked_cells(dim));
        for row in 0..dim {
            for col in 0..dim {
                data.push(f(row, col));
            }
        }
        Matrix { dim, data }
    }

    /// Build from row-major values. Returns `None` unless `values.len() == dim²`.
    pub fn from_rows(dim: usize, values: &[f64]) -> Option<Self> {
        (Self::cells(dim) == Some(values.len())).then(|| Matrix {
            dim,
            data: values.to_vec(),
        })
    }

    /// Identity matrix.
    pub fn identity(dim: usize) -> Self {
        Self::from_fn(dim, |row, col| if row == col { 1.0 } else { 0.0 })
    }

    /// Small integer values derived from `seed`.
    ///
    /// Products of these stay exact in `f64` for any realistic `dim`, so
    /// results from different loops compare with `==`.
    pub fn patterned(dim: usize, seed: usize) -> Self {
        Self::from_fn(dim, |row, col| ((row * 7 + col * 3 + seed) % 11) as f64 - 5.0)
    }

    /// Side length.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the matrix has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cell `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.dim + col]
    }

    /// Set cell `(row, col)`.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.dim + col] = value;
    }

    /// Row-major backing slice.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major backing slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Overwrite every cell with `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Largest absolute element-wise difference, `None` if dimensions differ.
    pub fn max_abs_diff(&self, other: &Matrix) -> Option<f64> {
        if self.dim != other.dim {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max),
        )
    }

    /// Element-wise equality within `tolerance`.
    pub fn approx_eq(&self, other: &Matrix, tolerance: f64) -> bool {
        self.max_abs_diff(other)
            .is_some_and(|diff| diff <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let m = Matrix::zeroed(3);
        assert_eq!(m.dim(), 3);
        assert_eq!(m.len(), 9);
        assert!(m.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_cells_detects_overflow() {
        assert_eq!(Matrix::cells(0), Some(0));
        assert_eq!(Matrix::cells(1024), Some(1024 * 1024));
        assert_eq!(Matrix::cells(usize::MAX), None);
        assert_eq!(Matrix::cells(1usize << (usize::BITS / 2)), None);
    }

    #[test]
    #[should_panic(expected = "overflows the cell count")]
    fn test_zeroed_rejects_overflowing_dimension() {
        let _ = Matrix::zeroed(1usize << (usize::BITS / 2));
    }

    #[test]
    fn test_from_rows_rejects_overflowing_dimension() {
        assert!(Matrix::from_rows(usize::MAX, &[]).is_none());
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let m = Matrix::from_fn(2, |row, col| (row * 10 + col) as f64);
        assert_eq!(m.as_slice(), &[0.0, 1.0, 10.0, 11.0]);
        assert_eq!(m.get(1, 0), 10.0);
    }

    #[test]
    fn test_from_rows_checks_length() {
        assert!(Matrix::from_rows(2, &[1.0, 2.0, 3.0]).is_none());
        let m = Matrix::from_rows(2, &[1.0, 2.0, 3.0, 4.0]).expect("2x2");
        assert_eq!(m.get(0, 1), 2.0);
    }

    #[test]
    fn test_set_and_fill() {
        let mut m = Matrix::zeroed(2);
        m.set(1, 1, 5.0);
        assert_eq!(m.get(1, 1), 5.0);
        m.fill(-1.0);
        assert!(m.as_slice().iter().all(|&x| x == -1.0));
    }

    #[test]
    fn test_patterned_values_are_small_integers() {
        let m = Matrix::patterned(16, 3);
        assert!(
            m.as_slice()
                .iter()
                .all(|&x| x.fract() == 0.0 && (-5.0..=5.0).contains(&x))
        );
        assert_ne!(Matrix::patterned(4, 0), Matrix::patterned(4, 1));
    }

    #[test]
    fn test_approx_eq() {
        let a = Matrix::identity(3);
        let mut b = a.clone();
        b.set(2, 2, 1.0 + 1e-12);
        assert!(a.approx_eq(&b, 1e-9));
        assert!(!a.approx_eq(&b, 0.0));
        assert!(!a.approx_eq(&Matrix::identity(4), 1.0));
        assert_eq!(a.max_abs_diff(&Matrix::identity(2)), None);
    }
}
