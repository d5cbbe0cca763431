use crate::{StepResultStore, Value, VariableStore};
use serde::{Deserialize, Serialize};

/// Predicate gating a step or terminating a loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The named variable equals `value`.
    #[serde(alias = "variables")]
    Variable {
        #[serde(alias = "variable", alias = "name")]
        target: String,
        value: Value,
    },
    /// The last recorded result of the named step equals `value`.
    ///
    /// When `value` is a string and the result is a map, holds if the map
    /// has a truthy entry under that key.
    StepResult {
        #[serde(alias = "step")]
        target: String,
        value: Value,
    },
}

impl Condition {
    pub fn variable(target: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Variable {
            target: target.into(),
            value: value.into(),
        }
    }

    pub fn step_result(target: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::StepResult {
            target: target.into(),
            value: value.into(),
        }
    }

    pub fn evaluate(&self, variables: &VariableStore, results: &StepResultStore) -> bool {
        match self {
            Condition::Variable { target, value } => {
                variables.get(target).unwrap_or(&Value::Null) == value
            }
            Condition::StepResult { target, value } => match (results.get(target), value) {
                (Some(Value::Object(map)), Value::String(key)) => {
                    map.get(key).is_some_and(Value::is_truthy)
                }
                (Some(recorded), expected) => recorded == expected,
                (None, expected) => expected.is_null(),
            },
        }
    }

    /// All conditions hold; an empty list always holds.
    pub fn all(conditions: &[Condition], variables: &VariableStore, results: &StepResultStore) -> bool {
        conditions.iter().all(|c| c.evaluate(variables, results))
    }

    /// At least one condition holds; an empty list never does.
    pub fn any(conditions: &[Condition], variables: &VariableStore, results: &StepResultStore) -> bool {
        conditions.iter().any(|c| c.evaluate(variables, results))
    }
}
