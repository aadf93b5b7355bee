//! One engine variable of a single element kind

use crate::array::{Array, Slicer};
use crate::engine::{EngineSession, Selection, VariableDef};
use crate::shape::{to_engine_shape, EngineDims};
use crate::types::{Dims, Element};
use crate::{ColStepError, Result};
use std::marker::PhantomData;

/// Bridges one element kind between the column surface and the engine.
///
/// Every access addresses the variable through the windows of its
/// [`EngineDims`]: the single-row window for per-row calls, the full-table
/// window for whole-column calls.
#[derive(Debug)]
pub struct TypedColumn<T: Element> {
    variable: String,
    dims: Option<EngineDims>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Element> TypedColumn<T> {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            dims: None,
            _kind: PhantomData,
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Engine descriptors, available once the variable is defined
    pub fn dims(&self) -> Option<&EngineDims> {
        self.dims.as_ref()
    }

    /// Define the variable `[total_rows] ++ row_shape` with the engine
    pub fn create(
        &mut self,
        session: &mut dyn EngineSession,
        row_shape: &[u64],
        total_rows: u64,
    ) -> Result<()> {
        let dims = to_engine_shape(row_shape, total_rows);
        session.define_variable(VariableDef::new(
            self.variable.clone(),
            T::KIND,
            dims.full_shape.clone(),
        ))?;
        self.dims = Some(dims);
        Ok(())
    }

    fn registered(&self) -> Result<&EngineDims> {
        self.dims.as_ref().ok_or_else(|| {
            ColStepError::UsageOrder(format!("variable {} is not defined", self.variable))
        })
    }

    fn checked_dims(&self, row: u64) -> Result<&EngineDims> {
        let dims = self.registered()?;
        if row >= dims.rows() {
            return Err(ColStepError::RowOutOfRange {
                row,
                rows: dims.rows(),
            });
        }
        Ok(dims)
    }

    fn check_shape(&self, expected: &[u64], actual: &[u64]) -> Result<()> {
        if expected != actual {
            return Err(ColStepError::ShapeMismatch {
                column: self.variable.clone(),
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(())
    }

    fn read(
        &self,
        session: &mut dyn EngineSession,
        selection: &Selection,
        shape: Dims,
    ) -> Result<Array<T>> {
        let values = T::from_data(session.get(&self.variable, selection)?)?;
        Array::from_vec(shape, values)
    }

    pub fn put_scalar(&self, session: &mut dyn EngineSession, row: u64, value: T) -> Result<()> {
        let window = self.checked_dims(row)?.row_window(row);
        session.put(&self.variable, &window, T::into_data(vec![value]))
    }

    pub fn get_scalar(&self, session: &mut dyn EngineSession, row: u64) -> Result<T> {
        let window = self.checked_dims(row)?.row_window(row);
        let mut values = T::from_data(session.get(&self.variable, &window)?)?;
        match (values.pop(), values.is_empty()) {
            (Some(value), true) => Ok(value),
            _ => Err(ColStepError::Engine(format!(
                "variable {}: row {} did not yield exactly one value",
                self.variable, row
            ))),
        }
    }

    /// Write one row's cell; the array shape must equal the row shape
    pub fn put_array(
        &self,
        session: &mut dyn EngineSession,
        row: u64,
        value: &Array<T>,
    ) -> Result<()> {
        let dims = self.checked_dims(row)?;
        self.check_shape(dims.row_shape(), value.shape())?;
        let window = dims.row_window(row);
        session.put(&self.variable, &window, T::into_data(value.as_slice().to_vec()))
    }

    pub fn get_array(&self, session: &mut dyn EngineSession, row: u64) -> Result<Array<T>> {
        let dims = self.checked_dims(row)?;
        let window = dims.row_window(row);
        let shape = dims.row_shape().to_vec();
        self.read(session, &window, shape)
    }

    /// Read a region of one row's cell
    pub fn get_slice(
        &self,
        session: &mut dyn EngineSession,
        row: u64,
        slicer: &Slicer,
    ) -> Result<Array<T>> {
        let window = self.checked_dims(row)?.row_slice_window(row, slicer)?;
        self.read(session, &window, slicer.length().to_vec())
    }

    /// Read every row in one engine call; shape `[rows] ++ row_shape`
    pub fn get_column(&self, session: &mut dyn EngineSession) -> Result<Array<T>> {
        let dims = self.registered()?;
        let window = dims.column_window();
        let shape = dims.full_shape.clone();
        self.read(session, &window, shape)
    }

    /// Write every row in one engine call
    pub fn put_column(&self, session: &mut dyn EngineSession, value: &Array<T>) -> Result<()> {
        let dims = self.registered()?;
        self.check_shape(&dims.full_shape, value.shape())?;
        let window = dims.column_window();
        session.put(&self.variable, &window, T::into_data(value.as_slice().to_vec()))
    }

    /// Read the same region of every row; shape `[rows] ++ slicer.length`
    pub fn get_column_slice(
        &self,
        session: &mut dyn EngineSession,
        slicer: &Slicer,
    ) -> Result<Array<T>> {
        let dims = self.registered()?;
        let window = dims.column_slice_window(slicer)?;
        let mut shape = Vec::with_capacity(slicer.length().len() + 1);
        shape.push(dims.rows());
        shape.extend_from_slice(slicer.length());
        self.read(session, &window, shape)
    }

    /// Values of a scalar column, one per row
    pub fn get_scalar_column(&self, session: &mut dyn EngineSession) -> Result<Vec<T>> {
        let dims = self.registered()?;
        if !dims.row_shape().is_empty() {
            return Err(ColStepError::UsageOrder(format!(
                "column {} is not a scalar column",
                self.variable
            )));
        }
        let window = dims.column_window();
        T::from_data(session.get(&self.variable, &window)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, InlineEngine, Engine, Mode};
    use crate::group::ProcessGroup;
    use std::path::Path;

    fn session() -> Box<dyn EngineSession> {
        let mut session = InlineEngine::new(&EngineConfig::default())
            .open(Path::new("typed"), Mode::Write, &ProcessGroup::single())
            .unwrap();
        session.begin_step().unwrap();
        session
    }

    #[test]
    fn test_scalar_rows() {
        let mut session = session();
        let mut column = TypedColumn::<u16>::new("counts");
        assert!(column.put_scalar(session.as_mut(), 0, 1).is_err());

        column.create(session.as_mut(), &[], 3).unwrap();
        for row in 0..3 {
            column.put_scalar(session.as_mut(), row, row as u16 * 100).unwrap();
        }
        assert_eq!(column.get_scalar(session.as_mut(), 2).unwrap(), 200);
        assert_eq!(
            column.get_scalar_column(session.as_mut()).unwrap(),
            vec![0, 100, 200]
        );
        assert!(matches!(
            column.put_scalar(session.as_mut(), 3, 1),
            Err(ColStepError::RowOutOfRange { row: 3, rows: 3 })
        ));
    }

    #[test]
    fn test_array_rows_and_slices() {
        let mut session = session();
        let mut column = TypedColumn::<f32>::new("grid");
        column.create(session.as_mut(), &[2, 3], 2).unwrap();

        let cell = Array::from_fn(vec![2, 3], |i| i as f32);
        column.put_array(session.as_mut(), 1, &cell).unwrap();
        assert_eq!(column.get_array(session.as_mut(), 1).unwrap(), cell);

        let slicer = Slicer::new(vec![1, 1], vec![1, 2]).unwrap();
        let part = column.get_slice(session.as_mut(), 1, &slicer).unwrap();
        assert_eq!(part.shape(), &[1, 2]);
        assert_eq!(part.as_slice(), &[4.0, 5.0]);

        let wrong = Array::<f32>::zeros(vec![3, 2]);
        assert!(matches!(
            column.put_array(session.as_mut(), 0, &wrong),
            Err(ColStepError::ShapeMismatch { .. })
        ));
        // the rejected put must not have reached the engine
        assert!(column.get_array(session.as_mut(), 0).is_err());
    }

    #[test]
    fn test_column_batch_paths() {
        let mut session = session();
        let mut column = TypedColumn::<i32>::new("m");
        column.create(session.as_mut(), &[2], 3).unwrap();

        let all = Array::from_fn(vec![3, 2], |i| i as i32);
        column.put_column(session.as_mut(), &all).unwrap();
        assert_eq!(column.get_column(session.as_mut()).unwrap(), all);

        let slicer = Slicer::new(vec![1], vec![1]).unwrap();
        let tail = column.get_column_slice(session.as_mut(), &slicer).unwrap();
        assert_eq!(tail.shape(), &[3, 1]);
        assert_eq!(tail.as_slice(), &[1, 3, 5]);

        assert!(column.get_scalar_column(session.as_mut()).is_err());
        assert!(column
            .put_column(session.as_mut(), &Array::zeros(vec![2, 2]))
            .is_err());
    }
}
