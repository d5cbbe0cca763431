use rpacore::FlowDefinition;
use std::path::{Path, PathBuf};

/// Supplies the set of device ids the pool should track
pub trait DeviceSource: Send + Sync + 'static {
    fn declared_devices(&self) -> Vec<String>;
}

/// Fixed device list
pub struct StaticDeviceSource {
    ids: Vec<String>,
}

impl StaticDeviceSource {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }
}

impl DeviceSource for StaticDeviceSource {
    fn declared_devices(&self) -> Vec<String> {
        self.ids.clone()
    }
}

/// Collects device ids from the `device` section of every flow file found
/// in a set of directories. Unreadable files are logged and skipped.
pub struct FlowDirectorySource {
    dirs: Vec<PathBuf>,
}

impl FlowDirectorySource {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    fn scan_dir(dir: &Path, ids: &mut Vec<String>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Skipping flow directory {}: {}", dir.display(), e);
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_flow_file(path))
            .collect();
        paths.sort();

        for path in paths {
            match FlowDefinition::from_file(&path) {
                Ok(flow) => {
                    for id in flow.candidate_devices() {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                Err(e) => tracing::warn!("Could not read flow file {}: {}", path.display(), e),
            }
        }
    }
}

impl DeviceSource for FlowDirectorySource {
    fn declared_devices(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for dir in &self.dirs {
            Self::scan_dir(dir, &mut ids);
        }
        ids
    }
}

fn is_flow_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml") | Some("json")
        )
}
