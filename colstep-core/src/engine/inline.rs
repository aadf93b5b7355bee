//! Inline engine: the stream lives in the writer session's memory

use super::{
    Engine, EngineConfig, EngineSession, Mode, Selection, VariableDef, VariableStore,
};
use crate::group::ProcessGroup;
use crate::types::ArrayData;
use crate::{ColStepError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// In-memory engine for single-process use; data does not outlive the session
pub struct InlineEngine;

impl InlineEngine {
    pub fn new(config: &EngineConfig) -> Self {
        for key in config.engine_params.keys() {
            warn!("Inline engine ignores parameter {}", key);
        }
        Self
    }
}

impl Engine for InlineEngine {
    fn name(&self) -> &str {
        "Inline"
    }

    fn open(
        &self,
        path: &Path,
        mode: Mode,
        group: &ProcessGroup,
    ) -> Result<Box<dyn EngineSession>> {
        if group.size() > 1 {
            return Err(ColStepError::Config(
                "Inline engine does not support process groups".into(),
            ));
        }
        match mode {
            Mode::Write => {
                debug!("Opened Inline stream {:?}", path);
                Ok(Box::new(InlineSession::default()))
            }
            Mode::Read => Err(ColStepError::Engine(format!(
                "Inline stream {:?} cannot be reopened for reading",
                path
            ))),
        }
    }

    fn remove(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct InlineSession {
    order: Vec<VariableDef>,
    stores: HashMap<String, VariableStore>,
    current_step: Option<u64>,
    steps: u64,
    closed: bool,
}

impl InlineSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ColStepError::UsageOrder("engine session is closed".into()));
        }
        Ok(())
    }
}

impl EngineSession for InlineSession {
    fn mode(&self) -> Mode {
        Mode::Write
    }

    fn define_variable(&mut self, def: VariableDef) -> Result<()> {
        self.ensure_open()?;
        match self.stores.get(&def.name) {
            Some(existing) if existing.def() == &def => Ok(()),
            Some(existing) => Err(ColStepError::Engine(format!(
                "variable {} redefined from {:?} to {:?}",
                def.name,
                existing.def(),
                def
            ))),
            None => {
                self.order.push(def.clone());
                self.stores.insert(def.name.clone(), VariableStore::new(def));
                Ok(())
            }
        }
    }

    fn variables(&self) -> Vec<VariableDef> {
        self.order.clone()
    }

    fn begin_step(&mut self) -> Result<u64> {
        self.ensure_open()?;
        if self.current_step.is_some() {
            return Err(ColStepError::UsageOrder("step already open".into()));
        }
        self.current_step = Some(self.steps);
        Ok(self.steps)
    }

    fn current_step(&self) -> Option<u64> {
        self.current_step
    }

    fn steps(&self) -> u64 {
        self.steps
    }

    fn put(&mut self, variable: &str, selection: &Selection, data: ArrayData) -> Result<()> {
        self.ensure_open()?;
        if self.current_step.is_none() {
            return Err(ColStepError::UsageOrder(format!(
                "put to {} outside of a step",
                variable
            )));
        }
        self.stores
            .get_mut(variable)
            .ok_or_else(|| ColStepError::Engine(format!("unknown variable {}", variable)))?
            .write(selection, &data)
    }

    fn get(&mut self, variable: &str, selection: &Selection) -> Result<ArrayData> {
        self.ensure_open()?;
        self.stores
            .get(variable)
            .ok_or_else(|| ColStepError::Engine(format!("unknown variable {}", variable)))?
            .read(selection)
    }

    fn end_step(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.current_step.take().is_none() {
            return Err(ColStepError::UsageOrder(
                "end_step without an open step".into(),
            ));
        }
        self.steps += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.current_step.is_some() {
            self.end_step()?;
        }
        self.closed = true;
        self.stores.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
