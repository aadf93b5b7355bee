//! Host data manager surface and the process-wide constructor registry

use crate::engine::EngineConfig;
use crate::group::ProcessGroup;
use crate::manager::StorageManager;
use crate::persist::{PropertyReader, PropertyWriter};
use crate::{config, ColStepError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Calls a host table framework makes on a storage manager
pub trait DataManager: Send {
    fn data_manager_type(&self) -> &str;
    fn data_manager_name(&self) -> &str;

    /// A fresh, unconfigured manager of the same type
    fn clone_manager(&self) -> Box<dyn DataManager>;

    fn set_file_name(&mut self, path: &Path);

    fn make_scalar_column(&mut self, name: &str, tag: i32, data_type_id: &str) -> Result<usize>;
    fn make_dir_arr_column(&mut self, name: &str, tag: i32, data_type_id: &str)
        -> Result<usize>;
    fn make_ind_arr_column(&mut self, name: &str, tag: i32, data_type_id: &str)
        -> Result<usize>;
    fn set_shape_column(&mut self, column: usize, shape: &[u64]) -> Result<()>;

    fn create(&mut self, rows: u64) -> Result<()>;
    fn open(&mut self, rows: u64, input: &mut PropertyReader) -> Result<()>;
    fn flush(&mut self, out: &mut PropertyWriter, fsync: bool) -> Result<bool>;
    fn add_row(&mut self, rows: u64) -> Result<()>;
    fn resync(&mut self, rows: u64) -> Result<()>;
    fn delete_manager(&mut self) -> Result<()>;

    fn nrows(&self) -> u64;
    fn ncolumns(&self) -> usize;

    /// Downcast hook for typed column access
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl DataManager for StorageManager {
    fn data_manager_type(&self) -> &str {
        StorageManager::data_manager_type(self)
    }

    fn data_manager_name(&self) -> &str {
        StorageManager::data_manager_name(self)
    }

    fn clone_manager(&self) -> Box<dyn DataManager> {
        Box::new(StorageManager::clone_manager(self))
    }

    fn set_file_name(&mut self, path: &Path) {
        StorageManager::set_file_name(self, path)
    }

    fn make_scalar_column(&mut self, name: &str, tag: i32, data_type_id: &str) -> Result<usize> {
        StorageManager::make_scalar_column(self, name, tag, data_type_id)
    }

    fn make_dir_arr_column(
        &mut self,
        name: &str,
        tag: i32,
        data_type_id: &str,
    ) -> Result<usize> {
        StorageManager::make_dir_arr_column(self, name, tag, data_type_id)
    }

    fn make_ind_arr_column(
        &mut self,
        name: &str,
        tag: i32,
        data_type_id: &str,
    ) -> Result<usize> {
        StorageManager::make_ind_arr_column(self, name, tag, data_type_id)
    }

    fn set_shape_column(&mut self, column: usize, shape: &[u64]) -> Result<()> {
        StorageManager::set_shape_column(self, column, shape)
    }

    fn create(&mut self, rows: u64) -> Result<()> {
        StorageManager::create(self, rows)
    }

    fn open(&mut self, rows: u64, input: &mut PropertyReader) -> Result<()> {
        StorageManager::open(self, rows, input)
    }

    fn flush(&mut self, out: &mut PropertyWriter, fsync: bool) -> Result<bool> {
        StorageManager::flush(self, out, fsync)
    }

    fn add_row(&mut self, rows: u64) -> Result<()> {
        StorageManager::add_row(self, rows)
    }

    fn resync(&mut self, rows: u64) -> Result<()> {
        StorageManager::resync(self, rows)
    }

    fn delete_manager(&mut self) -> Result<()> {
        StorageManager::delete_manager(self)
    }

    fn nrows(&self) -> u64 {
        StorageManager::nrows(self)
    }

    fn ncolumns(&self) -> usize {
        StorageManager::ncolumns(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Construction record handed to a registered constructor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSpec {
    /// Overrides the manager name persisted in the descriptor
    #[serde(rename = "ManagerName", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub config: EngineConfig,
}

impl ManagerSpec {
    /// Parse from JSON, e.g. `{"EngineType": "StepFile", "EngineParams": {}}`
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ColStepError::Config(format!("invalid manager spec: {}", e)))
    }
}

/// Builds a manager of one registered type
pub type ManagerCtor = fn(&str, &ManagerSpec, &ProcessGroup) -> Result<Box<dyn DataManager>>;

fn registry() -> &'static RwLock<HashMap<String, ManagerCtor>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, ManagerCtor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Install `ctor` under `type_name`, replacing any earlier registration
pub fn register_ctor(type_name: &str, ctor: ManagerCtor) {
    if registry().write().insert(type_name.to_string(), ctor).is_none() {
        debug!("Registered data manager type {}", type_name);
    }
}

pub fn is_registered(type_name: &str) -> bool {
    registry().read().contains_key(type_name)
}

fn make_colstep_manager(
    _type_name: &str,
    spec: &ManagerSpec,
    group: &ProcessGroup,
) -> Result<Box<dyn DataManager>> {
    let mut manager = StorageManager::with_group(spec.config.clone(), group.clone())?;
    if let Some(name) = &spec.name {
        manager = manager.with_name(name.clone());
    }
    Ok(Box::new(manager))
}

/// Register the column-step storage manager; safe to call repeatedly
pub fn register_colstep_manager() {
    if !is_registered(config::MANAGER_NAME) {
        register_ctor(config::MANAGER_NAME, make_colstep_manager);
        info!("Registered {} storage manager", config::MANAGER_NAME);
    }
}

/// Build a registered manager type in a single-process group
pub fn make_object(type_name: &str, spec: &ManagerSpec) -> Result<Box<dyn DataManager>> {
    make_object_in_group(type_name, spec, &ProcessGroup::single())
}

pub fn make_object_in_group(
    type_name: &str,
    spec: &ManagerSpec,
    group: &ProcessGroup,
) -> Result<Box<dyn DataManager>> {
    let ctor = registry()
        .read()
        .get(type_name)
        .copied()
        .ok_or_else(|| {
            ColStepError::Config(format!("no data manager registered as {}", type_name))
        })?;
    ctor(type_name, spec, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tags;

    #[test]
    fn test_register_and_make() {
        register_colstep_manager();
        register_colstep_manager();
        assert!(is_registered(config::MANAGER_NAME));

        let mut manager = make_object(config::MANAGER_NAME, &ManagerSpec::default()).unwrap();
        assert_eq!(manager.data_manager_type(), config::MANAGER_NAME);
        assert_eq!(manager.make_scalar_column("a", tags::INT, "").unwrap(), 0);
        assert!(manager
            .as_any_mut()
            .downcast_mut::<StorageManager>()
            .is_some());

        let clone = manager.clone_manager();
        assert_eq!(clone.ncolumns(), 0);

        assert!(matches!(
            make_object("NoSuchStMan", &ManagerSpec::default()),
            Err(ColStepError::Config(_))
        ));
    }

    #[test]
    fn test_spec_from_json() {
        let spec = ManagerSpec::from_json(
            r#"{"ManagerName": "Visibilities",
                "EngineType": "StepFile",
                "EngineParams": {"Compression": "lz4"},
                "TransportParams": [{}, {"Name": "X"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.name.as_deref(), Some("Visibilities"));
        assert_eq!(spec.config.engine_type, "StepFile");
        assert_eq!(spec.config.transport_params.len(), 2);

        register_colstep_manager();
        let manager = make_object(config::MANAGER_NAME, &spec).unwrap();
        assert_eq!(manager.data_manager_name(), "Visibilities");

        let spec = ManagerSpec::from_json(r#"{"EngineType": "Tape"}"#).unwrap();
        assert!(make_object(config::MANAGER_NAME, &spec).is_err());
        assert!(ManagerSpec::from_json("[1, 2]").is_err());
    }
}
