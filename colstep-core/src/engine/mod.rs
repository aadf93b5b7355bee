//! Step-based array engine contract and reference engines
//!
//! An engine stores named n-dimensional *variables*. Writers open a session,
//! define variables, then write in discrete *steps*: `begin_step`, any number
//! of buffered `put`s, `end_step`. Readers open the stream and `get`
//! rectangular selections of any variable; later steps overwrite earlier ones
//! where they overlap.
//!
//! Two engines are provided:
//!
//! - **StepFile** (default): a directory holding one data subfile per rank and
//!   a metadata index written by rank 0
//! - **Inline**: keeps everything in the session's memory; nothing survives
//!   `close`

mod config;
mod inline;
mod record;
mod step_file;
mod store;

pub use config::{CompressionKind, EngineConfig, StepFileOptions, SyncPolicy, Transport};
pub use inline::InlineEngine;
pub use record::{Block, StepRecord, StreamMeta};
pub use step_file::StepFileEngine;
pub use store::VariableStore;

use crate::group::ProcessGroup;
use crate::types::{num_elements, ArrayData, Dims, ElementKind};
use crate::{ColStepError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the default engine
pub const DEFAULT_ENGINE: &str = "StepFile";

/// Direction a session was opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write,
    Read,
}

/// Rectangular region of a variable: per-axis start and count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: Dims,
    pub count: Dims,
}

impl Selection {
    pub fn new(start: Dims, count: Dims) -> Self {
        Self { start, count }
    }

    /// Number of elements in the region
    pub fn len(&self) -> u64 {
        num_elements(&self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the region lies inside a variable of `shape`
    pub fn check_within(&self, variable: &str, shape: &[u64]) -> Result<()> {
        if self.start.len() != shape.len() || self.count.len() != shape.len() {
            return Err(ColStepError::Engine(format!(
                "variable {}: selection rank {} does not match variable rank {}",
                variable,
                self.start.len(),
                shape.len()
            )));
        }
        for ((&s, &c), &extent) in self.start.iter().zip(&self.count).zip(shape) {
            let end = s.checked_add(c).ok_or_else(|| {
                ColStepError::InvalidSlice(format!(
                    "variable {}: selection start {} + count {} overflows",
                    variable, s, c
                ))
            })?;
            if end > extent {
                return Err(ColStepError::Engine(format!(
                    "variable {}: selection start {:?} count {:?} exceeds shape {:?}",
                    variable, self.start, self.count, shape
                )));
            }
        }
        Ok(())
    }

    /// Flat row-major offsets, inside a variable of `shape`, of every element
    /// in the region, in row-major region order
    pub fn offsets_in(&self, shape: &[u64]) -> Vec<usize> {
        let total = self.len() as usize;
        let mut offsets = Vec::with_capacity(total);
        if total == 0 {
            return offsets;
        }

        let ndim = shape.len();
        let mut strides = vec![1u64; ndim];
        for axis in (0..ndim.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }

        let mut index = vec![0u64; ndim];
        loop {
            let flat: u64 = (0..ndim)
                .map(|axis| (self.start[axis] + index[axis]) * strides[axis])
                .sum();
            offsets.push(flat as usize);

            // odometer increment, last axis fastest
            let mut axis = ndim;
            loop {
                if axis == 0 {
                    return offsets;
                }
                axis -= 1;
                index[axis] += 1;
                if index[axis] < self.count[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }
}

/// Definition of one engine variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub kind: ElementKind,
    pub shape: Dims,
}

impl VariableDef {
    pub fn new(name: impl Into<String>, kind: ElementKind, shape: Dims) -> Self {
        Self {
            name: name.into(),
            kind,
            shape,
        }
    }
}

/// One open write-or-read stream
pub trait EngineSession: Send {
    /// Direction of the session
    fn mode(&self) -> Mode;

    /// Declare a variable; redeclaring an identical definition is allowed
    fn define_variable(&mut self, def: VariableDef) -> Result<()>;

    /// Variables in definition order
    fn variables(&self) -> Vec<VariableDef>;

    /// Open a new step; collective across the process group
    fn begin_step(&mut self) -> Result<u64>;

    /// Step currently open, if any
    fn current_step(&self) -> Option<u64>;

    /// Number of steps completed so far
    fn steps(&self) -> u64;

    /// Buffer a write of `data` into `selection` of `variable` for the open step
    fn put(&mut self, variable: &str, selection: &Selection, data: ArrayData) -> Result<()>;

    /// Read `selection` of `variable`
    fn get(&mut self, variable: &str, selection: &Selection) -> Result<ArrayData>;

    /// Commit the open step; collective across the process group
    fn end_step(&mut self) -> Result<()>;

    /// End any open step and release the stream; idempotent
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Factory for sessions of one engine type
pub trait Engine: Send + Sync {
    /// Engine type name
    fn name(&self) -> &str;

    /// Open a session on the stream at `path`
    fn open(&self, path: &Path, mode: Mode, group: &ProcessGroup)
        -> Result<Box<dyn EngineSession>>;

    /// Remove the stream at `path`
    fn remove(&self, path: &Path) -> Result<()>;
}

/// Build the engine named by `config.engine_type` (empty selects the default)
pub fn open_engine(config: &EngineConfig) -> Result<Box<dyn Engine>> {
    let engine_type = config.engine_type_or_default();
    match engine_type.to_ascii_lowercase().as_str() {
        "stepfile" | "file" | "bpfile" => Ok(Box::new(StepFileEngine::new(config)?)),
        "inline" | "memory" => Ok(Box::new(InlineEngine::new(config))),
        _ => Err(ColStepError::Config(format!(
            "unknown engine type {:?}",
            engine_type
        ))),
    }
}
