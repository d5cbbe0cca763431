use crate::Value;
use std::collections::HashMap;

/// Last recorded result per step name, scoped to one execution.
#[derive(Debug, Clone, Default)]
pub struct StepResultStore {
    results: HashMap<String, Value>,
}

impl StepResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: impl Into<String>, result: Value) {
        self.results.insert(step.into(), result);
    }

    pub fn get(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.results.contains_key(step)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.results.clone()
    }
}
