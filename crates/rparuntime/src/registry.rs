use rpacore::{Action, ActionError, DeviceDriver, FlowError, TextRecognizer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Resources injected into every action an engine builds
#[derive(Clone)]
pub struct ActionResources {
    pub device: Arc<dyn DeviceDriver>,
    pub recognizer: Option<Arc<dyn TextRecognizer>>,
    /// Base directory for relative export paths
    pub output_dir: PathBuf,
}

impl ActionResources {
    pub fn new(device: Arc<dyn DeviceDriver>) -> Self {
        Self {
            device,
            recognizer: None,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn device_id(&self) -> &str {
        self.device.serial()
    }

    /// OCR engine, or an error naming the action that needed it
    pub fn require_recognizer(&self, action: &str) -> Result<&Arc<dyn TextRecognizer>, ActionError> {
        self.recognizer
            .as_ref()
            .ok_or_else(|| ActionError::NotConfigured(format!("{} needs an OCR engine", action)))
    }
}

/// Factory trait for creating action instances
pub trait ActionFactory: Send + Sync {
    /// Create a new instance bound to the given resources
    fn create(&self, resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError>;

    /// Get action type identifier
    fn action_type(&self) -> &str;

    /// Optional: description and category for listings
    fn metadata(&self) -> ActionMetadata {
        ActionMetadata::default()
    }
}

/// Metadata about an action type
#[derive(Debug, Clone)]
pub struct ActionMetadata {
    pub description: String,
    pub category: String,
    pub params: Vec<ParamDefinition>,
}

impl Default for ActionMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ParamDefinition {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Registry of available action types
///
/// Built once at startup and shared read-only by every engine.
pub struct ActionRegistry {
    factories: HashMap<String, Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an action factory
    pub fn register(&mut self, factory: Arc<dyn ActionFactory>) {
        let action_type = factory.action_type().to_string();
        tracing::debug!("Registering action type: {}", action_type);
        self.factories.insert(action_type, factory);
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.factories.contains_key(action_type)
    }

    /// Create an action instance for the given type
    pub fn create_action(
        &self,
        action_type: &str,
        resources: &ActionResources,
    ) -> Result<Arc<dyn Action>, FlowError> {
        let factory = self
            .factories
            .get(action_type)
            .ok_or_else(|| FlowError::ActionNotFound(action_type.to_string()))?;

        factory
            .create(resources)
            .map_err(|e| FlowError::Configuration(format!("Failed to create action {}: {}", action_type, e)))
    }

    /// Get all registered action types, sorted
    pub fn list_action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for an action type
    pub fn get_metadata(&self, action_type: &str) -> Option<ActionMetadata> {
        self.factories.get(action_type).map(|f| f.metadata())
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
