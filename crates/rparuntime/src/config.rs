use crate::pool::PoolConfig;
use rpacore::FlowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the runtime
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub health_check_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub quarantine_grace_secs: u64,
    pub quarantine_sweep_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Failure notifications are only sent when this is set
    pub webhook_url: Option<String>,
    /// App name reported when a flow does not declare one
    pub app_name: String,
    pub event_buffer_size: usize,
    /// Directories scanned for declared devices
    pub flow_dirs: Vec<PathBuf>,
    /// Base directory for relative export paths
    pub output_dir: PathBuf,
    pub adb_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 10,
            reconcile_interval_secs: 600,
            quarantine_grace_secs: 600,
            quarantine_sweep_interval_secs: 60,
            probe_timeout_secs: 10,
            webhook_url: None,
            app_name: "rpa".to_string(),
            event_buffer_size: 1000,
            flow_dirs: vec![PathBuf::from("flows"), PathBuf::from("tests/flows")],
            output_dir: PathBuf::from("."),
            adb_path: "adb".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a YAML or JSON file (`.json` selects JSON)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_secs.max(1)),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs.max(1)),
            quarantine_grace: Duration::from_secs(self.quarantine_grace_secs),
            quarantine_sweep_interval: Duration::from_secs(self.quarantine_sweep_interval_secs.max(1)),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
        }
    }
}
