//! Engine configuration: engine type, engine parameters, transports

use super::DEFAULT_ENGINE;
use crate::{ColStepError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Key a transport map may use to name itself
pub const TRANSPORT_NAME_KEY: &str = "Name";

/// Engine selection and parameters, supplied when the manager is built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine type name; empty selects the default engine
    #[serde(rename = "EngineType", default)]
    pub engine_type: String,
    /// Engine parameter overrides
    #[serde(rename = "EngineParams", default)]
    pub engine_params: BTreeMap<String, String>,
    /// Transport parameter maps, in declaration order
    #[serde(rename = "TransportParams", default)]
    pub transport_params: Vec<BTreeMap<String, String>>,
}

/// A named transport and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn new(
        engine_type: impl Into<String>,
        engine_params: BTreeMap<String, String>,
        transport_params: Vec<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            engine_type: engine_type.into(),
            engine_params,
            transport_params,
        }
    }

    /// Parse from a JSON record such as
    /// `{"EngineType": "StepFile", "EngineParams": {"Compression": "lz4"}}`
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ColStepError::Config(format!("invalid engine config: {}", e)))
    }

    pub fn engine_type_or_default(&self) -> &str {
        if self.engine_type.is_empty() {
            DEFAULT_ENGINE
        } else {
            &self.engine_type
        }
    }

    /// Transports with resolved names: a map's own `Name` entry, or else its
    /// position in the list
    pub fn transports(&self) -> Vec<Transport> {
        self.transport_params
            .iter()
            .enumerate()
            .map(|(position, params)| {
                let name = params
                    .get(TRANSPORT_NAME_KEY)
                    .cloned()
                    .unwrap_or_else(|| position.to_string());
                Transport {
                    name,
                    params: params.clone(),
                }
            })
            .collect()
    }
}

/// Payload compression for step records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionKind {
    #[default]
    None,
    Lz4,
}

/// When step data is synced to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync at the end of every step
    Immediate,
    /// Sync once when the session closes
    #[default]
    OnClose,
    /// Never sync (OS decides)
    None,
}

/// Parameters understood by the StepFile engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepFileOptions {
    pub compression: CompressionKind,
    pub sync_policy: SyncPolicy,
}

impl StepFileOptions {
    /// Read options from engine parameters; unknown keys are ignored with a warning
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in params {
            match key.as_str() {
                "Compression" => {
                    options.compression = match value.to_ascii_lowercase().as_str() {
                        "none" | "" => CompressionKind::None,
                        "lz4" => CompressionKind::Lz4,
                        other => {
                            return Err(ColStepError::Config(format!(
                                "unsupported compression {:?}",
                                other
                            )))
                        }
                    }
                }
                "SyncPolicy" => {
                    options.sync_policy = match value.to_ascii_lowercase().as_str() {
                        "immediate" => SyncPolicy::Immediate,
                        "onclose" => SyncPolicy::OnClose,
                        "none" => SyncPolicy::None,
                        other => {
                            return Err(ColStepError::Config(format!(
                                "unsupported sync policy {:?}",
                                other
                            )))
                        }
                    }
                }
                _ => warn!("Ignoring unknown engine parameter {}={}", key, value),
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_transport_naming() {
        let config = EngineConfig::new(
            "",
            BTreeMap::new(),
            vec![params(&[]), params(&[("Name", "X")]), params(&[])],
        );
        let names: Vec<_> = config.transports().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["0", "X", "2"]);
    }

    #[test]
    fn test_default_engine_type() {
        let config = EngineConfig::default();
        assert_eq!(config.engine_type_or_default(), DEFAULT_ENGINE);
        assert!(config.engine_params.is_empty());
        assert!(config.transports().is_empty());
    }

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json(
            r#"{"EngineType": "Inline",
                "EngineParams": {"Compression": "lz4"},
                "TransportParams": [{"Library": "posix"}]}"#,
        )
        .unwrap();
        assert_eq!(config.engine_type, "Inline");
        assert_eq!(config.engine_params["Compression"], "lz4");
        assert_eq!(config.transports()[0].name, "0");

        assert!(EngineConfig::from_json("{").is_err());
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_step_file_options() {
        let options = StepFileOptions::from_params(&params(&[
            ("Compression", "LZ4"),
            ("SyncPolicy", "Immediate"),
            ("Threads", "4"),
        ]))
        .unwrap();
        assert_eq!(options.compression, CompressionKind::Lz4);
        assert_eq!(options.sync_policy, SyncPolicy::Immediate);

        assert!(StepFileOptions::from_params(&params(&[("Compression", "zstd")])).is_err());
    }
}
