//! ColStep Core - table column storage over a step-based array engine
//!
//! Adapts a row-oriented table storage interface (fixed schema, per-row scalar
//! and n-dimensional array cells) to an engine that stores named array
//! *variables* written in discrete *steps*.
//!
//! # Architecture
//!
//! - **Columns**: one generic typed column per element kind behind a closed
//!   enum, addressed through row and full-table windows
//! - **Shape mapping**: a column's row shape becomes the variable shape
//!   `[rows] ++ row_shape`
//! - **Storage manager**: sequences engine configuration, variable definition
//!   and step boundaries against the host's create/open/flush/resync calls
//! - **Engines**: `StepFile` (per-rank subfiles + metadata index) and `Inline`
//! - **Process groups**: cooperating writers whose step boundaries are
//!   collective

pub mod array;
pub mod column;
pub mod engine;
pub mod group;
pub mod manager;
pub mod persist;
pub mod registry;
pub mod shape;

mod error;
mod types;

pub use array::{Array, Slicer};
pub use column::{Column, ColumnElement, ColumnState};
pub use engine::{EngineConfig, Mode};
pub use error::{ColStepError, Result};
pub use group::{ProcessGroup, ThreadGroup};
pub use manager::{ColumnAccess, Phase, StorageManager};
pub use persist::{PropertyReader, PropertyWriter};
pub use registry::{make_object, register_colstep_manager, DataManager, ManagerSpec};
pub use types::*;

/// ColStep version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Name the storage manager registers and persists under
    pub const MANAGER_NAME: &str = "ColStepStMan";

    /// Internal type tag persisted with the manager descriptor
    pub const DEFAULT_TYPE_TAG: i32 = 0;

    /// Suffix appended to the table data path to name the engine stream
    pub const STREAM_SUFFIX: &str = ".colstep";
}
