//! Dense in-memory image of one variable

use super::{Selection, VariableDef};
use crate::types::{num_elements, ArrayData};
use crate::{ColStepError, Result};

/// Full-shape buffer of a variable plus a mask of elements some step wrote
#[derive(Debug, Clone)]
pub struct VariableStore {
    def: VariableDef,
    data: ArrayData,
    written: Vec<bool>,
}

impl VariableStore {
    pub fn new(def: VariableDef) -> Self {
        let len = num_elements(&def.shape) as usize;
        Self {
            data: ArrayData::with_default(def.kind, len),
            written: vec![false; len],
            def,
        }
    }

    pub fn def(&self) -> &VariableDef {
        &self.def
    }

    /// Validate a write before it is buffered
    pub fn check_write(&self, selection: &Selection, data: &ArrayData) -> Result<()> {
        selection.check_within(&self.def.name, &self.def.shape)?;
        if data.kind() != self.def.kind {
            return Err(ColStepError::Engine(format!(
                "variable {} holds {}, put supplied {}",
                self.def.name,
                self.def.kind,
                data.kind()
            )));
        }
        if data.len() as u64 != selection.len() {
            return Err(ColStepError::Engine(format!(
                "variable {}: selection of {} elements, put supplied {}",
                self.def.name,
                selection.len(),
                data.len()
            )));
        }
        Ok(())
    }

    /// Overwrite `selection` with `data`
    pub fn write(&mut self, selection: &Selection, data: &ArrayData) -> Result<()> {
        self.check_write(selection, data)?;
        let offsets = selection.offsets_in(&self.def.shape);
        self.data.scatter(data, &offsets)?;
        for offset in offsets {
            self.written[offset] = true;
        }
        Ok(())
    }

    /// Read `selection`; every element must have been written
    pub fn read(&self, selection: &Selection) -> Result<ArrayData> {
        selection.check_within(&self.def.name, &self.def.shape)?;
        let offsets = selection.offsets_in(&self.def.shape);
        if offsets.iter().any(|&offset| !self.written[offset]) {
            return Err(ColStepError::SelectionNotWritten {
                variable: self.def.name.clone(),
            });
        }
        Ok(self.data.gather(&offsets))
    }
}
