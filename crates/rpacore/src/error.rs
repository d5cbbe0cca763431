use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Step '{step}' failed: {source}")]
    ActionExecution {
        step: String,
        #[source]
        source: ActionError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowError {
    /// Name of the step that raised this error, if it came from one.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            FlowError::ActionExecution { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ActionError {
    #[error("Missing required param: {0}")]
    MissingParam(String),

    #[error("Invalid param type for '{field}': expected {expected}, got {actual}")]
    InvalidParam {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl ActionError {
    pub fn invalid(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ActionError::InvalidParam {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    #[error("Device {device} unreachable: {reason}")]
    Connectivity { device: String, reason: String },

    #[error("Command on device {device} failed: {reason}")]
    Command { device: String, reason: String },
}
