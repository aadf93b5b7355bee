//! Multi-dimensional cell values and slice regions

use crate::types::{checked_num_elements, num_elements, Dims, Element};
use crate::{ColStepError, Result};

/// Dense n-dimensional array stored in row-major order (last axis fastest)
#[derive(Debug, Clone, PartialEq)]
pub struct Array<T> {
    shape: Dims,
    data: Vec<T>,
}

impl<T: Element> Array<T> {
    /// Create an array from a shape and its flattened data
    pub fn from_vec(shape: Dims, data: Vec<T>) -> Result<Self> {
        if checked_num_elements(&shape) != Some(data.len() as u64) {
            return Err(ColStepError::ShapeMismatch {
                column: String::new(),
                expected: shape,
                actual: vec![data.len() as u64],
            });
        }
        Ok(Self { shape, data })
    }

    /// Array of the given shape filled with one value
    pub fn filled(shape: Dims, value: T) -> Self {
        let len = num_elements(&shape) as usize;
        Self {
            shape,
            data: vec![value; len],
        }
    }

    /// Array filled with default values
    pub fn zeros(shape: Dims) -> Self {
        Self::filled(shape, T::default())
    }

    /// Array whose element at flat index `i` is `f(i)`
    pub fn from_fn(shape: Dims, f: impl FnMut(usize) -> T) -> Self {
        let len = num_elements(&shape) as usize;
        Self {
            shape,
            data: (0..len).map(f).collect(),
        }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Element at a multi-dimensional index
    pub fn get(&self, index: &[u64]) -> Option<&T> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0u64;
        for (&i, &extent) in index.iter().zip(&self.shape) {
            if i >= extent {
                return None;
            }
            flat = flat * extent + i;
        }
        self.data.get(flat as usize)
    }

    /// Sub-array along the first axis, dropping that axis
    pub fn row(&self, index: u64) -> Option<Array<T>> {
        let (&rows, rest) = self.shape.split_first()?;
        if index >= rows {
            return None;
        }
        let stride = num_elements(rest) as usize;
        let start = index as usize * stride;
        Some(Array {
            shape: rest.to_vec(),
            data: self.data[start..start + stride].to_vec(),
        })
    }

    /// Same data viewed with a different shape of equal element count
    pub fn reshape(self, shape: Dims) -> Result<Self> {
        Self::from_vec(shape, self.data)
    }
}

/// Rectangular region of an array cell: per-axis start and length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slicer {
    start: Dims,
    length: Dims,
}

impl Slicer {
    pub fn new(start: Dims, length: Dims) -> Result<Self> {
        if start.len() != length.len() {
            return Err(ColStepError::InvalidSlice(format!(
                "start has {} axes, length has {}",
                start.len(),
                length.len()
            )));
        }
        Ok(Self { start, length })
    }

    /// Region covering a whole shape
    pub fn full(shape: &[u64]) -> Self {
        Self {
            start: vec![0; shape.len()],
            length: shape.to_vec(),
        }
    }

    pub fn start(&self) -> &[u64] {
        &self.start
    }

    pub fn length(&self) -> &[u64] {
        &self.length
    }

    /// Check the region lies within `shape`
    pub fn validate(&self, shape: &[u64]) -> Result<()> {
        if self.start.len() != shape.len() {
            return Err(ColStepError::InvalidSlice(format!(
                "slice has {} axes, cell shape {:?} has {}",
                self.start.len(),
                shape,
                shape.len()
            )));
        }
        for (axis, ((&s, &l), &extent)) in self
            .start
            .iter()
            .zip(&self.length)
            .zip(shape)
            .enumerate()
        {
            let end = s.checked_add(l).ok_or_else(|| {
                ColStepError::InvalidSlice(format!(
                    "axis {}: start {} + length {} overflows",
                    axis, s, l
                ))
            })?;
            if l == 0 || end > extent {
                return Err(ColStepError::InvalidSlice(format!(
                    "axis {}: [{}, {}) outside extent {}",
                    axis, s, end, extent
                )));
            }
        }
        Ok(())
    }
}
