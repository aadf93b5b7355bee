//! Column declaration: host data type tags to typed columns

use crate::column::Column;
use crate::types::{ElementKind, ShapeCategory};
use crate::{ColStepError, Result};
use tracing::debug;

/// Resolve the element kind of a column declared with `tag`.
///
/// Array columns accept the element tag or its array-of form; scalar columns
/// only the scalar form. Tags outside the eleven kinds fail here, before any
/// column exists.
pub fn resolve_kind(name: &str, tag: i32, category: ShapeCategory) -> Result<ElementKind> {
    let (kind, array_tag) =
        ElementKind::from_tag(tag).ok_or_else(|| ColStepError::UnsupportedDataType {
            column: name.to_string(),
            tag,
        })?;
    if array_tag && !category.is_array() {
        return Err(ColStepError::Config(format!(
            "scalar column {} declared with array data type tag {}",
            name, tag
        )));
    }
    Ok(kind)
}

/// Append a new column to `columns`, returning its column number
pub fn declare_column(
    columns: &mut Vec<Column>,
    name: &str,
    tag: i32,
    category: ShapeCategory,
    data_type_id: &str,
) -> Result<usize> {
    if name.trim().is_empty() {
        return Err(ColStepError::InvalidColumnName(name.to_string()));
    }
    if columns.iter().any(|c| c.name() == name) {
        return Err(ColStepError::DuplicateColumn(name.to_string()));
    }
    let kind = resolve_kind(name, tag, category)?;

    let number = columns.len();
    columns.push(Column::new(name, number, kind, category, data_type_id));
    debug!(
        "Declared column {} #{} ({} {})",
        name,
        number,
        category.code(),
        kind
    );
    Ok(number)
}
