//! Storage manager - lifecycle coordinator between the host table and the engine
//!
//! The manager owns the column arena, the engine configuration, the process
//! group handle and at most one engine session. It runs
//! configure → declare → create / open → steps → flush → teardown.

mod factory;

pub use factory::{declare_column, resolve_kind};

use crate::array::{Array, Slicer};
use crate::column::{Column, ColumnElement, ColumnState};
use crate::engine::{open_engine, Engine, EngineConfig, EngineSession, Mode};
use crate::group::ProcessGroup;
use crate::persist::{ManagerDescriptor, PropertyReader, PropertyWriter};
use crate::types::{Dims, ShapeCategory};
use crate::{config, ColStepError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the manager is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting configuration and column declarations
    Configured,
    /// Write session open with one step in progress
    Created,
    /// Descriptor restored; the read session opens on first column access
    Opened,
    /// Session released
    Closed,
}

/// Owns the engine session; ends the open step and closes on drop
pub struct SessionGuard {
    session: Box<dyn EngineSession>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn EngineSession>) -> Self {
        Self { session }
    }

    pub fn session(&mut self) -> &mut dyn EngineSession {
        self.session.as_mut()
    }

    /// Close the session, reporting the error the drop path would swallow
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.session.is_closed() {
            if let Err(e) = self.session.close() {
                warn!("Failed to close engine session: {}", e);
            }
        }
    }
}

/// Storage manager adapting table columns to engine variables
pub struct StorageManager {
    name: String,
    type_tag: i32,
    n_rows: u64,
    columns: Vec<Column>,
    config: EngineConfig,
    group: ProcessGroup,
    engine: Arc<dyn Engine>,
    file_name: Option<PathBuf>,
    session: Option<SessionGuard>,
    phase: Phase,
}

impl StorageManager {
    /// Manager on the default engine in a single-process group
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Self::with_group(config, ProcessGroup::single())
    }

    /// Manager whose step boundaries are collective over `group`
    pub fn with_group(config: EngineConfig, group: ProcessGroup) -> Result<Self> {
        let engine: Arc<dyn Engine> = Arc::from(open_engine(&config)?);
        Ok(Self {
            name: config::MANAGER_NAME.to_string(),
            type_tag: config::DEFAULT_TYPE_TAG,
            n_rows: 0,
            columns: Vec::new(),
            config,
            group,
            engine,
            file_name: None,
            session: None,
            phase: Phase::Configured,
        })
    }

    /// Rename the manager; the name is persisted by `flush`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the engine configuration before any session exists
    pub fn configure(
        &mut self,
        engine_type: &str,
        engine_params: BTreeMap<String, String>,
        transport_params: Vec<BTreeMap<String, String>>,
    ) -> Result<()> {
        self.ensure_phase(Phase::Configured, "configure")?;
        let config = EngineConfig::new(engine_type, engine_params, transport_params);
        self.engine = Arc::from(open_engine(&config)?);
        self.config = config;
        debug!(
            "Configured manager {} with engine {}",
            self.name,
            self.engine.name()
        );
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn data_manager_type(&self) -> &str {
        &self.name
    }

    pub fn data_manager_name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> i32 {
        self.type_tag
    }

    pub fn nrows(&self) -> u64 {
        self.n_rows
    }

    pub fn ncolumns(&self) -> usize {
        self.columns.len()
    }

    /// Bind the table-relative data path; the stream lives at `<path>.colstep`
    pub fn set_file_name(&mut self, path: impl AsRef<Path>) {
        self.file_name = Some(path.as_ref().to_path_buf());
    }

    /// Location of the engine stream, once a file name is bound
    pub fn stream_path(&self) -> Option<PathBuf> {
        self.file_name.as_ref().map(|path| {
            let mut stream = OsString::from(path.as_os_str());
            stream.push(config::STREAM_SUFFIX);
            PathBuf::from(stream)
        })
    }

    fn require_stream_path(&self) -> Result<PathBuf> {
        self.stream_path().ok_or_else(|| {
            ColStepError::UsageOrder(format!("manager {} has no file name bound", self.name))
        })
    }

    fn ensure_phase(&self, expected: Phase, operation: &str) -> Result<()> {
        if self.phase != expected {
            return Err(ColStepError::UsageOrder(format!(
                "{} on manager {} in phase {:?}",
                operation, self.name, self.phase
            )));
        }
        Ok(())
    }

    // Column declaration

    pub fn make_scalar_column(
        &mut self,
        name: &str,
        tag: i32,
        data_type_id: &str,
    ) -> Result<usize> {
        self.declare(name, tag, ShapeCategory::Scalar, data_type_id)
    }

    pub fn make_dir_arr_column(
        &mut self,
        name: &str,
        tag: i32,
        data_type_id: &str,
    ) -> Result<usize> {
        self.declare(name, tag, ShapeCategory::DirectArray, data_type_id)
    }

    pub fn make_ind_arr_column(
        &mut self,
        name: &str,
        tag: i32,
        data_type_id: &str,
    ) -> Result<usize> {
        self.declare(name, tag, ShapeCategory::IndirectArray, data_type_id)
    }

    fn declare(
        &mut self,
        name: &str,
        tag: i32,
        category: ShapeCategory,
        data_type_id: &str,
    ) -> Result<usize> {
        self.ensure_phase(Phase::Configured, "column declaration")?;
        declare_column(&mut self.columns, name, tag, category, data_type_id)
    }

    /// Bind the row shape of an array column
    pub fn set_shape_column(&mut self, number: usize, shape: &[u64]) -> Result<()> {
        self.column_mut(number)?.set_shape(shape)
    }

    /// Column metadata by number, without engine access
    pub fn column_info(&self, number: usize) -> Result<&Column> {
        self.columns
            .get(number)
            .ok_or_else(|| ColStepError::UsageOrder(format!("no column number {}", number)))
    }

    pub fn column_number(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    fn column_mut(&mut self, number: usize) -> Result<&mut Column> {
        self.columns
            .get_mut(number)
            .ok_or_else(|| ColStepError::UsageOrder(format!("no column number {}", number)))
    }

    // Lifecycle

    /// Open a write session sized for `rows`, define every column's variable
    /// in column-number order and begin the first step
    pub fn create(&mut self, rows: u64) -> Result<()> {
        self.ensure_phase(Phase::Configured, "create")?;
        let started = self.start_session(rows);
        if let Err(e) = &started {
            // peers may already wait in the engine's collective setup
            self.group.abort(&format!("create failed: {}", e));
        }
        let (path, guard, step) = started?;

        self.n_rows = rows;
        self.session = Some(guard);
        self.phase = Phase::Created;
        info!(
            "Created manager {} on {:?}: {} columns, {} rows, step {} open (rank {} of {})",
            self.name,
            path,
            self.columns.len(),
            rows,
            step,
            self.group.rank(),
            self.group.size()
        );
        Ok(())
    }

    fn start_session(&mut self, rows: u64) -> Result<(PathBuf, SessionGuard, u64)> {
        let path = self.require_stream_path()?;
        let mut guard = SessionGuard::new(self.engine.open(&path, Mode::Write, &self.group)?);
        for column in self.columns.iter_mut() {
            column.register(guard.session(), rows)?;
        }
        let step = guard.session().begin_step()?;
        Ok((path, guard, step))
    }

    /// Restore the persisted descriptor of an existing table with `rows` rows
    pub fn open(&mut self, rows: u64, input: &mut PropertyReader) -> Result<()> {
        self.ensure_phase(Phase::Configured, "open")?;
        let descriptor = ManagerDescriptor::read(input, &self.name)?;
        self.name = descriptor.name;
        self.type_tag = descriptor.type_tag;
        self.n_rows = rows;
        self.phase = Phase::Opened;
        info!(
            "Opened manager {} (type tag {}, {} rows)",
            self.name, self.type_tag, rows
        );
        Ok(())
    }

    /// Persist the manager descriptor. Column data durability belongs to the
    /// engine; `fsync` is accepted for the host contract.
    pub fn flush(&mut self, out: &mut PropertyWriter, fsync: bool) -> Result<bool> {
        ManagerDescriptor {
            name: self.name.clone(),
            type_tag: self.type_tag,
        }
        .write(out)?;
        debug!("Flushed manager {} descriptor (fsync {})", self.name, fsync);
        Ok(true)
    }

    /// Rows can only be sized at create; later growth is refused
    pub fn add_row(&mut self, rows: u64) -> Result<()> {
        if rows == 0 || self.phase == Phase::Configured {
            return Ok(());
        }
        Err(ColStepError::RowCountFixed {
            fixed: self.n_rows,
            requested: self.n_rows.saturating_add(rows),
        })
    }

    pub fn resync(&mut self, rows: u64) -> Result<()> {
        if rows == self.n_rows {
            return Ok(());
        }
        Err(ColStepError::RowCountFixed {
            fixed: self.n_rows,
            requested: rows,
        })
    }

    /// End the open write step and begin the next; collective in a group
    pub fn advance_step(&mut self) -> Result<u64> {
        self.ensure_phase(Phase::Created, "advance_step")?;
        let guard = self
            .session
            .as_mut()
            .ok_or_else(|| ColStepError::UsageOrder("no engine session".into()))?;
        guard.session().end_step()?;
        let dirty = self
            .columns
            .iter_mut()
            .map(|c| c.take_dirty())
            .filter(|&dirty| dirty)
            .count();
        let step = guard.session().begin_step()?;
        debug!(
            "Manager {} advanced to step {} ({} columns written in the last step)",
            self.name, step, dirty
        );
        Ok(step)
    }

    /// Typed access to a column. After `open` the first access attaches the
    /// read session.
    pub fn column(&mut self, number: usize) -> Result<ColumnAccess<'_>> {
        if number >= self.columns.len() {
            return Err(ColStepError::UsageOrder(format!("no column number {}", number)));
        }
        self.ensure_session()?;
        let rows = self.n_rows;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ColStepError::UsageOrder("no engine session".into()))?
            .session();
        let column = &mut self.columns[number];
        if session.mode() == Mode::Read {
            column.attach(session, rows)?;
        }
        Ok(ColumnAccess { column, session })
    }

    pub fn column_by_name(&mut self, name: &str) -> Result<ColumnAccess<'_>> {
        let number = self
            .column_number(name)
            .ok_or_else(|| ColStepError::UsageOrder(format!("no column named {}", name)))?;
        self.column(number)
    }

    fn ensure_session(&mut self) -> Result<()> {
        match self.phase {
            Phase::Created => Ok(()),
            Phase::Opened if self.session.is_some() => Ok(()),
            Phase::Opened => {
                let path = self.require_stream_path()?;
                let session = self.engine.open(&path, Mode::Read, &self.group)?;
                self.session = Some(SessionGuard::new(session));
                debug!("Manager {} attached read session on {:?}", self.name, path);
                Ok(())
            }
            Phase::Configured | Phase::Closed => Err(ColStepError::UsageOrder(format!(
                "column access on manager {} in phase {:?}",
                self.name, self.phase
            ))),
        }
    }

    /// End the open step, close the session and retire the columns; idempotent
    pub fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        let result = match self.session.as_mut() {
            Some(guard) => guard.close(),
            None => Ok(()),
        };
        self.session = None;
        for column in &mut self.columns {
            if column.state() != ColumnState::Closed {
                column.close();
            }
        }
        self.phase = Phase::Closed;
        info!("Closed manager {} (rank {})", self.name, self.group.rank());
        result
    }

    /// Fresh manager with the same identity, configuration and group; no
    /// columns and no session
    pub fn clone_manager(&self) -> Self {
        Self {
            name: self.name.clone(),
            type_tag: self.type_tag,
            n_rows: 0,
            columns: Vec::new(),
            config: self.config.clone(),
            group: self.group.clone(),
            engine: Arc::clone(&self.engine),
            file_name: None,
            session: None,
            phase: Phase::Configured,
        }
    }

    /// Tear down and remove the engine stream
    pub fn delete_manager(&mut self) -> Result<()> {
        self.close()?;
        if let Some(path) = self.stream_path() {
            if self.group.is_root() {
                self.engine.remove(&path)?;
            }
            info!("Deleted manager {} stream {:?}", self.name, path);
        }
        Ok(())
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close manager {}: {}", self.name, e);
        }
    }
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("rows", &self.n_rows)
            .field("columns", &self.columns.len())
            .field("engine", &self.engine.name())
            .field("group", &self.group)
            .field("phase", &self.phase)
            .finish()
    }
}

/// A column paired with the manager's session for the duration of a borrow
pub struct ColumnAccess<'a> {
    column: &'a mut Column,
    session: &'a mut dyn EngineSession,
}

impl<'a> ColumnAccess<'a> {
    pub fn column(&self) -> &Column {
        &*self.column
    }

    /// Column and session, for the per-kind accessors on [`Column`]
    pub fn parts(&mut self) -> (&mut Column, &mut dyn EngineSession) {
        (&mut *self.column, &mut *self.session)
    }

    pub fn name(&self) -> &str {
        self.column.name()
    }

    pub fn shape(&self, row: u64) -> Result<Dims> {
        self.column.shape(row)
    }

    pub fn put_scalar<T: ColumnElement>(&mut self, row: u64, value: T) -> Result<()> {
        self.column.put_scalar(&mut *self.session, row, value)
    }

    pub fn get_scalar<T: ColumnElement>(&mut self, row: u64) -> Result<T> {
        self.column.get_scalar(&mut *self.session, row)
    }

    pub fn put_array<T: ColumnElement>(&mut self, row: u64, value: &Array<T>) -> Result<()> {
        self.column.put_array(&mut *self.session, row, value)
    }

    pub fn get_array<T: ColumnElement>(&mut self, row: u64) -> Result<Array<T>> {
        self.column.get_array(&mut *self.session, row)
    }

    pub fn get_slice<T: ColumnElement>(&mut self, row: u64, slicer: &Slicer) -> Result<Array<T>> {
        self.column.get_slice(&mut *self.session, row, slicer)
    }

    pub fn get_column<T: ColumnElement>(&mut self) -> Result<Array<T>> {
        self.column.get_column(&mut *self.session)
    }

    pub fn put_column<T: ColumnElement>(&mut self, value: &Array<T>) -> Result<()> {
        self.column.put_column(&mut *self.session, value)
    }

    pub fn get_column_slice<T: ColumnElement>(&mut self, slicer: &Slicer) -> Result<Array<T>> {
        self.column.get_column_slice(&mut *self.session, slicer)
    }

    pub fn get_scalar_column<T: ColumnElement>(&mut self) -> Result<Vec<T>> {
        self.column.get_scalar_column(&mut *self.session)
    }
}
