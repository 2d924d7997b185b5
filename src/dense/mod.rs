use anyhow::bail;
use ndarray::{s, Array2, ArrayView1, Axis};

/// In-place growth operations on dense factor and source matrices.
///
/// Rows are only ever appended at the bottom and columns are only resized at
/// the right, so existing entries keep their `(row, col)` position.
pub trait MatrixGrowth {
    /// Appends `row` below the last row.
    fn append_row(&mut self, row: ArrayView1<f64>) -> anyhow::Result<()>;

    /// Appends `count` rows of zeros.
    fn append_zero_rows(&mut self, count: usize);

    /// Sets the column count to `ncols`, keeping the leading columns and
    /// zero-filling any new ones.
    fn resize_columns(&mut self, ncols: usize);

    /// Overwrites column `col` with `values`.
    fn insert_column(&mut self, col: usize, values: ArrayView1<f64>) -> anyhow::Result<()>;

    /// Reshapes to `(nrows, ncols)` if needed, keeping the overlapping block.
    fn fit_shape(&mut self, nrows: usize, ncols: usize);
}

impl MatrixGrowth for Array2<f64> {
    fn append_row(&mut self, row: ArrayView1<f64>) -> anyhow::Result<()> {
        if row.len() != self.ncols() {
            bail!(
                "Length of row ({}) does not match number of columns ({})",
                row.len(),
                self.ncols()
            );
        }
        self.push_row(row)?;
        Ok(())
    }

    fn append_zero_rows(&mut self, count: usize) {
        let (rows, cols) = self.dim();
        self.fit_shape(rows + count, cols);
    }

    fn resize_columns(&mut self, ncols: usize) {
        let rows = self.nrows();
        self.fit_shape(rows, ncols);
    }

    fn insert_column(&mut self, col: usize, values: ArrayView1<f64>) -> anyhow::Result<()> {
        if col >= self.ncols() {
            bail!(
                "Column index ({}) out of range for {} columns",
                col,
                self.ncols()
            );
        }
        if values.len() != self.nrows() {
            bail!(
                "Length of column ({}) does not match number of rows ({})",
                values.len(),
                self.nrows()
            );
        }
        self.index_axis_mut(Axis(1), col).assign(&values);
        Ok(())
    }

    fn fit_shape(&mut self, nrows: usize, ncols: usize) {
        if self.dim() == (nrows, ncols) {
            return;
        }
        let keep_rows = self.nrows().min(nrows);
        let keep_cols = self.ncols().min(ncols);
        let mut resized = Array2::<f64>::zeros((nrows, ncols));
        resized
            .slice_mut(s![..keep_rows, ..keep_cols])
            .assign(&self.slice(s![..keep_rows, ..keep_cols]));
        *self = resized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_append_row() {
        let mut arr = array![[1.0, 2.0], [3.0, 4.0]];
        arr.append_row(array![5.0, 6.0].view()).unwrap();

        assert_eq!(arr, array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    }

    #[test]
    fn test_append_row_errors() {
        let mut arr = Array2::<f64>::zeros((2, 2));

        assert!(arr.append_row(array![1.0].view()).is_err());
        assert_eq!(arr.nrows(), 2);
    }

    #[test]
    fn test_append_row_to_transposed_layout() {
        let mut arr = array![[1.0, 2.0], [3.0, 4.0]].reversed_axes();
        arr.append_row(array![9.0, 9.0].view()).unwrap();

        assert_eq!(arr, array![[1.0, 3.0], [2.0, 4.0], [9.0, 9.0]]);
    }

    #[test]
    fn test_append_zero_rows() {
        let mut arr = array![[1.0, 2.0]];
        arr.append_zero_rows(2);

        assert_eq!(arr, array![[1.0, 2.0], [0.0, 0.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_resize_columns_keeps_leading_columns() {
        let mut arr = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

        arr.resize_columns(2);
        assert_eq!(arr, array![[1.0, 2.0], [4.0, 5.0]]);

        arr.resize_columns(4);
        assert_eq!(arr, array![[1.0, 2.0, 0.0, 0.0], [4.0, 5.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_insert_column() {
        let mut arr = Array2::<f64>::zeros((2, 2));
        arr.insert_column(1, array![7.0, 8.0].view()).unwrap();

        assert_eq!(arr, array![[0.0, 7.0], [0.0, 8.0]]);
        assert!(arr.insert_column(2, array![1.0, 1.0].view()).is_err());
        assert!(arr.insert_column(0, array![1.0].view()).is_err());
    }

    #[test]
    fn test_fit_shape_from_empty() {
        let mut arr = Array2::<f64>::zeros((3, 0));
        arr.fit_shape(3, 2);

        assert_eq!(arr.dim(), (3, 2));
        assert!(arr.iter().all(|&v| v == 0.0));
    }
}
