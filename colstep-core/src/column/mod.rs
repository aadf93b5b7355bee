//! Table columns backed by engine variables
//!
//! A [`Column`] carries the identity and lifecycle of one table column and
//! wraps a [`TypedColumn`] of the column's element kind inside the closed
//! [`TypedVariant`] enum. Typed access (`put_scalar::<i32>`, `get_array::<f64>`)
//! resolves the variant through [`ColumnElement`]; asking for the wrong kind is
//! a `TypeMismatch`, never a silent conversion.
//!
//! Lifecycle: `Declared → ShapeBound → Registered → Closed`. Scalar columns are
//! shape-bound at declaration; array columns on their first `set_shape`.

mod typed;

pub use typed::TypedColumn;

use crate::array::{Array, Slicer};
use crate::engine::EngineSession;
use crate::types::{
    checked_num_elements, Complex32, Complex64, Dims, Element, ElementKind, ShapeCategory,
};
use crate::{ColStepError, Result};
use tracing::debug;

/// Lifecycle state of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnState {
    /// Known by name and kind, no shape yet
    Declared,
    /// Row shape fixed
    ShapeBound,
    /// Variable defined with an open engine session
    Registered,
    /// Owning manager released its session
    Closed,
}

/// One typed column per element kind
#[derive(Debug)]
pub enum TypedVariant {
    Bool(TypedColumn<bool>),
    UInt8(TypedColumn<u8>),
    Int16(TypedColumn<i16>),
    UInt16(TypedColumn<u16>),
    Int32(TypedColumn<i32>),
    UInt32(TypedColumn<u32>),
    Float32(TypedColumn<f32>),
    Float64(TypedColumn<f64>),
    Complex32(TypedColumn<Complex32>),
    Complex64(TypedColumn<Complex64>),
    String(TypedColumn<String>),
}

/// Run `$body` with `$t` bound to the typed column inside any variant
macro_rules! dispatch {
    ($variant:expr, $t:ident => $body:expr) => {
        match $variant {
            TypedVariant::Bool($t) => $body,
            TypedVariant::UInt8($t) => $body,
            TypedVariant::Int16($t) => $body,
            TypedVariant::UInt16($t) => $body,
            TypedVariant::Int32($t) => $body,
            TypedVariant::UInt32($t) => $body,
            TypedVariant::Float32($t) => $body,
            TypedVariant::Float64($t) => $body,
            TypedVariant::Complex32($t) => $body,
            TypedVariant::Complex64($t) => $body,
            TypedVariant::String($t) => $body,
        }
    };
}

impl TypedVariant {
    /// Typed column for `kind` backed by the variable `name`
    pub fn new(kind: ElementKind, name: &str) -> Self {
        match kind {
            ElementKind::Bool => TypedVariant::Bool(TypedColumn::new(name)),
            ElementKind::UInt8 => TypedVariant::UInt8(TypedColumn::new(name)),
            ElementKind::Int16 => TypedVariant::Int16(TypedColumn::new(name)),
            ElementKind::UInt16 => TypedVariant::UInt16(TypedColumn::new(name)),
            ElementKind::Int32 => TypedVariant::Int32(TypedColumn::new(name)),
            ElementKind::UInt32 => TypedVariant::UInt32(TypedColumn::new(name)),
            ElementKind::Float32 => TypedVariant::Float32(TypedColumn::new(name)),
            ElementKind::Float64 => TypedVariant::Float64(TypedColumn::new(name)),
            ElementKind::Complex32 => TypedVariant::Complex32(TypedColumn::new(name)),
            ElementKind::Complex64 => TypedVariant::Complex64(TypedColumn::new(name)),
            ElementKind::String => TypedVariant::String(TypedColumn::new(name)),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            TypedVariant::Bool(_) => ElementKind::Bool,
            TypedVariant::UInt8(_) => ElementKind::UInt8,
            TypedVariant::Int16(_) => ElementKind::Int16,
            TypedVariant::UInt16(_) => ElementKind::UInt16,
            TypedVariant::Int32(_) => ElementKind::Int32,
            TypedVariant::UInt32(_) => ElementKind::UInt32,
            TypedVariant::Float32(_) => ElementKind::Float32,
            TypedVariant::Float64(_) => ElementKind::Float64,
            TypedVariant::Complex32(_) => ElementKind::Complex32,
            TypedVariant::Complex64(_) => ElementKind::Complex64,
            TypedVariant::String(_) => ElementKind::String,
        }
    }

    fn create(
        &mut self,
        session: &mut dyn EngineSession,
        row_shape: &[u64],
        total_rows: u64,
    ) -> Result<()> {
        dispatch!(self, t => t.create(session, row_shape, total_rows))
    }
}

/// Element types that can select their typed column out of a [`TypedVariant`]
pub trait ColumnElement: Element {
    fn typed(variant: &TypedVariant) -> Option<&TypedColumn<Self>>;
}

macro_rules! impl_column_element {
    ($ty:ty, $variant:ident) => {
        impl ColumnElement for $ty {
            fn typed(variant: &TypedVariant) -> Option<&TypedColumn<Self>> {
                match variant {
                    TypedVariant::$variant(t) => Some(t),
                    _ => None,
                }
            }
        }
    };
}

impl_column_element!(bool, Bool);
impl_column_element!(u8, UInt8);
impl_column_element!(i16, Int16);
impl_column_element!(u16, UInt16);
impl_column_element!(i32, Int32);
impl_column_element!(u32, UInt32);
impl_column_element!(f32, Float32);
impl_column_element!(f64, Float64);
impl_column_element!(Complex32, Complex32);
impl_column_element!(Complex64, Complex64);
impl_column_element!(String, String);

/// A table column stored as one engine variable
#[derive(Debug)]
pub struct Column {
    name: String,
    number: usize,
    category: ShapeCategory,
    data_type_id: String,
    row_shape: Option<Dims>,
    state: ColumnState,
    dirty: bool,
    typed: TypedVariant,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        number: usize,
        kind: ElementKind,
        category: ShapeCategory,
        data_type_id: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let (row_shape, state) = match category {
            ShapeCategory::Scalar => (Some(Vec::new()), ColumnState::ShapeBound),
            _ => (None, ColumnState::Declared),
        };
        Self {
            typed: TypedVariant::new(kind, &name),
            name,
            number,
            category,
            data_type_id: data_type_id.into(),
            row_shape,
            state,
            dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the column within its manager
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn kind(&self) -> ElementKind {
        self.typed.kind()
    }

    pub fn category(&self) -> ShapeCategory {
        self.category
    }

    pub fn data_type_id(&self) -> &str {
        &self.data_type_id
    }

    /// Host data type tag of the column
    pub fn data_type_tag(&self) -> i32 {
        if self.category.is_array() {
            self.kind().array_tag()
        } else {
            self.kind().scalar_tag()
        }
    }

    pub fn state(&self) -> ColumnState {
        self.state
    }

    /// Whether a put reached the engine since the last step boundary
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn typed_variant(&self) -> &TypedVariant {
        &self.typed
    }

    /// Row shape; empty for scalar columns, `None` until bound
    pub fn row_shape(&self) -> Option<&[u64]> {
        self.row_shape.as_deref()
    }

    /// Cell shape of a row (identical for every row)
    pub fn shape(&self, _row: u64) -> Result<Dims> {
        self.row_shape.clone().ok_or_else(|| {
            ColStepError::UsageOrder(format!("column {} has no shape", self.name))
        })
    }

    /// Bind the row shape of an array column. Binding the same shape again is
    /// accepted; any other shape is rejected.
    pub fn set_shape(&mut self, shape: &[u64]) -> Result<()> {
        if !self.category.is_array() {
            return Err(ColStepError::UsageOrder(format!(
                "scalar column {} cannot take a shape",
                self.name
            )));
        }
        if let Some(bound) = &self.row_shape {
            if bound.as_slice() == shape {
                return Ok(());
            }
            return Err(ColStepError::ShapeReassigned {
                column: self.name.clone(),
                bound: bound.clone(),
                requested: shape.to_vec(),
            });
        }
        if shape.is_empty() || shape.contains(&0) {
            return Err(ColStepError::Config(format!(
                "column {}: array shape {:?} must have positive extents",
                self.name, shape
            )));
        }
        if checked_num_elements(shape).is_none() {
            return Err(ColStepError::Config(format!(
                "column {}: array shape {:?} holds more elements than a u64 counts",
                self.name, shape
            )));
        }
        self.row_shape = Some(shape.to_vec());
        self.state = ColumnState::ShapeBound;
        Ok(())
    }

    /// Define the column's variable in a freshly opened write session
    pub fn register(&mut self, session: &mut dyn EngineSession, total_rows: u64) -> Result<()> {
        match self.state {
            ColumnState::ShapeBound => {}
            ColumnState::Declared => {
                return Err(ColStepError::UsageOrder(format!(
                    "array column {} has no shape at create",
                    self.name
                )))
            }
            ColumnState::Registered | ColumnState::Closed => {
                return Err(ColStepError::UsageOrder(format!(
                    "column {} is already registered",
                    self.name
                )))
            }
        }
        let row_shape = self.row_shape.clone().unwrap_or_default();
        let cells = checked_num_elements(&row_shape).and_then(|n| n.checked_mul(total_rows));
        if cells.is_none() {
            return Err(ColStepError::Config(format!(
                "column {}: {} rows of shape {:?} overflow the element count",
                self.name, total_rows, row_shape
            )));
        }
        self.typed.create(session, &row_shape, total_rows)?;
        self.state = ColumnState::Registered;
        debug!(
            "Registered column {} #{} ({} {}, row shape {:?}, {} rows)",
            self.name,
            self.number,
            self.category.code(),
            self.kind(),
            row_shape,
            total_rows
        );
        Ok(())
    }

    /// Bind the column to its variable in a read session over existing data.
    /// An unbound array shape is taken from the stream.
    pub fn attach(&mut self, session: &mut dyn EngineSession, total_rows: u64) -> Result<()> {
        if self.state == ColumnState::Registered {
            return Ok(());
        }
        let def = session
            .variables()
            .into_iter()
            .find(|def| def.name == self.name)
            .ok_or_else(|| {
                ColStepError::Engine(format!("stream has no variable for column {}", self.name))
            })?;
        if def.kind != self.kind() {
            return Err(ColStepError::TypeMismatch {
                column: self.name.clone(),
                expected: self.kind().name(),
                actual: def.kind.name(),
            });
        }
        if self.row_shape.is_none() {
            let stored = def.shape.get(1..).unwrap_or_default();
            self.set_shape(stored)?;
        }
        self.state = ColumnState::ShapeBound;
        self.register(session, total_rows)
    }

    /// Leave the registered state for good
    pub fn close(&mut self) {
        self.state = ColumnState::Closed;
        self.dirty = false;
    }

    /// Clear the dirty flag at a step boundary, reporting its old value
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn ensure_registered(&self) -> Result<()> {
        match self.state {
            ColumnState::Registered => Ok(()),
            ColumnState::Closed => Err(ColStepError::UsageOrder(format!(
                "column {} is closed",
                self.name
            ))),
            _ => Err(ColStepError::UsageOrder(format!(
                "column {} is not registered with an engine session",
                self.name
            ))),
        }
    }

    fn ensure_category(&self, array: bool) -> Result<()> {
        if self.category.is_array() != array {
            let want = if array { "array" } else { "scalar" };
            return Err(ColStepError::UsageOrder(format!(
                "column {} is not a {} column",
                self.name, want
            )));
        }
        Ok(())
    }

    fn typed<T: ColumnElement>(&self) -> Result<&TypedColumn<T>> {
        self.ensure_registered()?;
        T::typed(&self.typed).ok_or_else(|| ColStepError::TypeMismatch {
            column: self.name.clone(),
            expected: self.kind().name(),
            actual: T::KIND.name(),
        })
    }

    pub fn put_scalar<T: ColumnElement>(
        &mut self,
        session: &mut dyn EngineSession,
        row: u64,
        value: T,
    ) -> Result<()> {
        self.ensure_category(false)?;
        self.typed::<T>()?.put_scalar(session, row, value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn get_scalar<T: ColumnElement>(
        &self,
        session: &mut dyn EngineSession,
        row: u64,
    ) -> Result<T> {
        self.ensure_category(false)?;
        self.typed::<T>()?.get_scalar(session, row)
    }

    pub fn put_array<T: ColumnElement>(
        &mut self,
        session: &mut dyn EngineSession,
        row: u64,
        value: &Array<T>,
    ) -> Result<()> {
        self.ensure_category(true)?;
        self.typed::<T>()?.put_array(session, row, value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn get_array<T: ColumnElement>(
        &self,
        session: &mut dyn EngineSession,
        row: u64,
    ) -> Result<Array<T>> {
        self.ensure_category(true)?;
        self.typed::<T>()?.get_array(session, row)
    }

    pub fn get_slice<T: ColumnElement>(
        &self,
        session: &mut dyn EngineSession,
        row: u64,
        slicer: &Slicer,
    ) -> Result<Array<T>> {
        self.ensure_category(true)?;
        self.typed::<T>()?.get_slice(session, row, slicer)
    }

    /// All rows; a scalar column yields a 1-D array of length `rows`
    pub fn get_column<T: ColumnElement>(
        &self,
        session: &mut dyn EngineSession,
    ) -> Result<Array<T>> {
        self.typed::<T>()?.get_column(session)
    }

    pub fn put_column<T: ColumnElement>(
        &mut self,
        session: &mut dyn EngineSession,
        value: &Array<T>,
    ) -> Result<()> {
        self.typed::<T>()?.put_column(session, value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn get_column_slice<T: ColumnElement>(
        &self,
        session: &mut dyn EngineSession,
        slicer: &Slicer,
    ) -> Result<Array<T>> {
        self.ensure_category(true)?;
        self.typed::<T>()?.get_column_slice(session, slicer)
    }

    pub fn get_scalar_column<T: ColumnElement>(
        &self,
        session: &mut dyn EngineSession,
    ) -> Result<Vec<T>> {
        self.ensure_category(false)?;
        self.typed::<T>()?.get_scalar_column(session)
    }
}

/// Per-kind scalar accessors in the shape the host framework calls them
macro_rules! scalar_accessors {
    ($(($put:ident, $get:ident, $ty:ty)),* $(,)?) => {
        impl Column {
            $(
                pub fn $put(
                    &mut self,
                    session: &mut dyn EngineSession,
                    row: u64,
                    value: $ty,
                ) -> Result<()> {
                    self.put_scalar::<$ty>(session, row, value)
                }

                pub fn $get(&self, session: &mut dyn EngineSession, row: u64) -> Result<$ty> {
                    self.get_scalar::<$ty>(session, row)
                }
            )*
        }
    };
}

scalar_accessors!(
    (put_bool, get_bool, bool),
    (put_uchar, get_uchar, u8),
    (put_short, get_short, i16),
    (put_ushort, get_ushort, u16),
    (put_int, get_int, i32),
    (put_uint, get_uint, u32),
    (put_float, get_float, f32),
    (put_double, get_double, f64),
    (put_complex, get_complex, Complex32),
    (put_dcomplex, get_dcomplex, Complex64),
    (put_string, get_string, String),
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig, InlineEngine, Mode};
    use crate::group::ProcessGroup;
    use std::path::Path;

    fn session() -> Box<dyn EngineSession> {
        InlineEngine::new(&EngineConfig::default())
            .open(Path::new("columns"), Mode::Write, &ProcessGroup::single())
            .unwrap()
    }

    #[test]
    fn test_lifecycle_states() {
        let mut session = session();
        let mut column =
            Column::new("data", 0, ElementKind::Float64, ShapeCategory::DirectArray, "");
        assert_eq!(column.state(), ColumnState::Declared);
        assert!(column.register(session.as_mut(), 2).is_err());

        column.set_shape(&[3, 4]).unwrap();
        assert_eq!(column.state(), ColumnState::ShapeBound);
        column.set_shape(&[3, 4]).unwrap();
        assert!(matches!(
            column.set_shape(&[4, 3]),
            Err(ColStepError::ShapeReassigned { .. })
        ));

        assert!(column.get_array::<f64>(session.as_mut(), 0).is_err());
        column.register(session.as_mut(), 2).unwrap();
        assert_eq!(column.state(), ColumnState::Registered);
        assert_eq!(column.shape(1).unwrap(), vec![3, 4]);

        column.close();
        assert!(matches!(
            column.get_array::<f64>(session.as_mut(), 0),
            Err(ColStepError::UsageOrder(_))
        ));
    }

    #[test]
    fn test_oversized_shapes_rejected() {
        let mut session = session();
        let mut column =
            Column::new("huge", 0, ElementKind::Float64, ShapeCategory::DirectArray, "");
        assert!(matches!(
            column.set_shape(&[u64::MAX, 2]),
            Err(ColStepError::Config(_))
        ));
        assert_eq!(column.state(), ColumnState::Declared);

        column.set_shape(&[1 << 32, 1 << 16]).unwrap();
        assert!(matches!(
            column.register(session.as_mut(), 1 << 20),
            Err(ColStepError::Config(_))
        ));
        assert_eq!(column.state(), ColumnState::ShapeBound);
    }

    #[test]
    fn test_typed_access() {
        let mut session = session();
        let mut column = Column::new("flag", 0, ElementKind::Int32, ShapeCategory::Scalar, "");
        assert_eq!(column.state(), ColumnState::ShapeBound);
        assert!(column.set_shape(&[2]).is_err());
        column.register(session.as_mut(), 2).unwrap();

        session.begin_step().unwrap();
        assert!(!column.is_dirty());
        column.put_int(session.as_mut(), 1, -3).unwrap();
        assert!(column.is_dirty());
        assert_eq!(column.get_int(session.as_mut(), 1).unwrap(), -3);

        assert!(matches!(
            column.put_double(session.as_mut(), 0, 1.0),
            Err(ColStepError::TypeMismatch { .. })
        ));
        assert!(column
            .put_array(session.as_mut(), 0, &Array::<i32>::zeros(vec![1]))
            .is_err());
        assert!(column.take_dirty());
        assert!(!column.is_dirty());
    }

    #[test]
    fn test_data_type_tags() {
        let scalar = Column::new("a", 0, ElementKind::String, ShapeCategory::Scalar, "");
        let array = Column::new("b", 1, ElementKind::String, ShapeCategory::IndirectArray, "");
        assert_eq!(scalar.data_type_tag(), crate::types::tags::STRING);
        assert_eq!(array.data_type_tag(), crate::types::tags::ARRAY_STRING);
    }
}
