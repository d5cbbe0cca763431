use crate::{events::StepEmitter, ActionError, Value, VariableStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Core trait that every step action implements
///
/// Instances are built by a factory with their device/OCR resources
/// already injected, so `execute` only sees resolved params and the
/// execution's variable scope.
#[async_trait]
pub trait Action: Send + Sync {
    /// Registry key (e.g. "click_region", "set_variable")
    fn action_type(&self) -> &str;

    /// Run the action. The returned value is recorded as the step result.
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError>;
}

/// Execution context handed to an action for one step
pub struct ActionContext<'a> {
    /// Name of the step being executed
    pub step_name: &'a str,

    /// Params with all `${...}` references already resolved
    pub params: Params,

    /// Variable scope of the running flow
    pub variables: &'a mut VariableStore,

    /// Event emitter for real-time updates
    pub events: StepEmitter,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        step_name: &'a str,
        params: HashMap<String, Value>,
        variables: &'a mut VariableStore,
        events: StepEmitter,
    ) -> Self {
        Self {
            step_name,
            params: Params::new(params),
            variables,
            events,
        }
    }
}

/// Resolved step params with typed accessors
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, Value>,
}

impl Params {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Like [`Params::get`] but keeps explicit nulls.
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get required param or return error
    pub fn require(&self, name: &str) -> Result<&Value, ActionError> {
        self.get(name)
            .ok_or_else(|| ActionError::MissingParam(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ActionError> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| ActionError::invalid(name, "string", value.kind()))
    }

    /// Numbers and numeric strings are both accepted.
    pub fn require_f64(&self, name: &str) -> Result<f64, ActionError> {
        let value = self.require(name)?;
        value
            .to_number()
            .ok_or_else(|| ActionError::invalid(name, "number", value.kind()))
    }

    pub fn require_i64(&self, name: &str) -> Result<i64, ActionError> {
        self.require_f64(name).map(|n| n as i64)
    }

    /// Get param with default
    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name).cloned().unwrap_or(default)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Optional number; a present but non-numeric value is an error.
    pub fn get_f64_or(&self, name: &str, default: f64) -> Result<f64, ActionError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .to_number()
                .ok_or_else(|| ActionError::invalid(name, "number", value.kind())),
        }
    }

    /// Required number of seconds as a [`Duration`]
    pub fn require_secs(&self, name: &str) -> Result<Duration, ActionError> {
        secs_to_duration(name, self.require_f64(name)?)
    }

    pub fn get_secs_or(&self, name: &str, default: f64) -> Result<Duration, ActionError> {
        secs_to_duration(name, self.get_f64_or(name, default)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Negative, NaN, infinite and out-of-range values are rejected.
fn secs_to_duration(name: &str, secs: f64) -> Result<Duration, ActionError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ActionError::invalid(name, "non-negative number of seconds", secs.to_string()))
}

impl From<HashMap<String, Value>> for Params {
    fn from(values: HashMap<String, Value>) -> Self {
        Self::new(values)
    }
}
