use crate::{template, Value};
use std::collections::HashMap;

/// Variable scope of one flow execution.
///
/// Holds the flat variables written by actions plus an optional structured
/// context (the flow's `prerequisites` block) that dotted references can
/// reach into.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    vars: HashMap<String, Value>,
    context: Value,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: HashMap<String, Value>) -> Self {
        Self {
            vars: seed,
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.vars.get(name).cloned().unwrap_or(default)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn extend(&mut self, values: HashMap<String, Value>) {
        self.vars.extend(values);
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.vars.clone()
    }

    /// Look up a bare or dotted reference.
    ///
    /// Order: exact flat name, then first segment as a variable with the
    /// rest descending into it, then the prerequisites context.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.vars.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let head = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        if let Some(root) = self.vars.get(head) {
            if let Some(found) = root.get_path(rest.iter().copied()) {
                return Some(found);
            }
        }
        if head == "prerequisites" {
            return self.context.get_path(rest.iter().copied());
        }
        self.context.get_path(path.split('.'))
    }

    /// Resolve `${...}` references in a value, recursing into lists and maps.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => template::resolve_str(s, self),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn resolve_map(&self, params: &HashMap<String, Value>) -> HashMap<String, Value> {
        params
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve(v)))
            .collect()
    }
}
