//! Mapping between per-row cell shapes and engine variable shapes
//!
//! A column with row shape `[a, b]` in a table of `n` rows is stored as one
//! engine variable of shape `[n, a, b]`. Single-row access uses the window
//! `start = [row, 0, 0]`, `count = [1, a, b]`; whole-column access uses
//! `start = [0, 0, 0]`, `count = [n, a, b]`. Scalar columns have an empty row
//! shape and degenerate to a 1-D variable of length `n`.

use crate::array::Slicer;
use crate::engine::Selection;
use crate::types::Dims;
use crate::Result;

/// Engine addressing descriptors derived from one row shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDims {
    /// Full variable shape: `[rows] ++ row_shape`
    pub full_shape: Dims,
    /// Start of the full-table window (all zeros)
    pub full_start: Dims,
    /// Extent of the full-table window (equal to `full_shape`)
    pub full_count: Dims,
    /// Start of the single-row window for row 0
    pub row_start: Dims,
    /// Extent of the single-row window: `[1] ++ row_shape`
    pub row_count: Dims,
}

/// Translate a row shape and table length into engine descriptors
pub fn to_engine_shape(row_shape: &[u64], total_rows: u64) -> EngineDims {
    let ndim = row_shape.len() + 1;

    let mut full_shape = Vec::with_capacity(ndim);
    full_shape.push(total_rows);
    full_shape.extend_from_slice(row_shape);

    let mut row_count = Vec::with_capacity(ndim);
    row_count.push(1);
    row_count.extend_from_slice(row_shape);

    EngineDims {
        full_start: vec![0; ndim],
        full_count: full_shape.clone(),
        full_shape,
        row_start: vec![0; ndim],
        row_count,
    }
}

impl EngineDims {
    /// Number of rows in the variable
    pub fn rows(&self) -> u64 {
        self.full_shape[0]
    }

    /// Per-row shape with the leading row axis removed
    pub fn row_shape(&self) -> &[u64] {
        &self.full_shape[1..]
    }

    /// Window addressing one whole row
    pub fn row_window(&self, row: u64) -> Selection {
        let mut start = self.row_start.clone();
        start[0] = row;
        Selection::new(start, self.row_count.clone())
    }

    /// Window addressing all rows
    pub fn column_window(&self) -> Selection {
        Selection::new(self.full_start.clone(), self.full_count.clone())
    }

    /// Window addressing a region of one row
    pub fn row_slice_window(&self, row: u64, slicer: &Slicer) -> Result<Selection> {
        slicer.validate(self.row_shape())?;
        let mut start = Vec::with_capacity(self.full_shape.len());
        start.push(row);
        start.extend_from_slice(slicer.start());
        let mut count = Vec::with_capacity(self.full_shape.len());
        count.push(1);
        count.extend_from_slice(slicer.length());
        Ok(Selection::new(start, count))
    }

    /// Window addressing the same region across every row
    pub fn column_slice_window(&self, slicer: &Slicer) -> Result<Selection> {
        slicer.validate(self.row_shape())?;
        let mut start = Vec::with_capacity(self.full_shape.len());
        start.push(0);
        start.extend_from_slice(slicer.start());
        let mut count = Vec::with_capacity(self.full_shape.len());
        count.push(self.rows());
        count.extend_from_slice(slicer.length());
        Ok(Selection::new(start, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape() {
        let dims = to_engine_shape(&[3, 4], 10);
        assert_eq!(dims.full_shape, vec![10, 3, 4]);
        assert_eq!(dims.full_count, vec![10, 3, 4]);
        assert_eq!(dims.full_start, vec![0, 0, 0]);
        assert_eq!(dims.row_start, vec![0, 0, 0]);
        assert_eq!(dims.row_count, vec![1, 3, 4]);
        assert_eq!(dims.row_shape(), &[3, 4]);
    }

    #[test]
    fn test_scalar_shape() {
        let dims = to_engine_shape(&[], 7);
        assert_eq!(dims.full_shape, vec![7]);
        assert_eq!(dims.row_start, vec![0]);
        assert_eq!(dims.row_count, vec![1]);
        assert!(dims.row_shape().is_empty());
    }

    #[test]
    fn test_windows() {
        let dims = to_engine_shape(&[5, 6], 4);
        let window = dims.row_window(2);
        assert_eq!(window.start, vec![2, 0, 0]);
        assert_eq!(window.count, vec![1, 5, 6]);

        let slicer = Slicer::new(vec![1, 2], vec![3, 1]).unwrap();
        let window = dims.row_slice_window(3, &slicer).unwrap();
        assert_eq!(window.start, vec![3, 1, 2]);
        assert_eq!(window.count, vec![1, 3, 1]);

        let window = dims.column_slice_window(&slicer).unwrap();
        assert_eq!(window.start, vec![0, 1, 2]);
        assert_eq!(window.count, vec![4, 3, 1]);

        let bad = Slicer::new(vec![4, 0], vec![2, 1]).unwrap();
        assert!(dims.row_slice_window(0, &bad).is_err());
    }
}
