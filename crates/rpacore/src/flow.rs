use crate::{Condition, FlowError, Value};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Complete flow document
///
/// `name`, `version` and `steps` are optional at the type level so that a
/// document missing them still deserializes; [`FlowDefinition::validate`]
/// reports their absence as a configuration error before anything runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub device: Option<DeviceSpec>,
    #[serde(default)]
    pub prerequisites: Option<Value>,
    #[serde(default)]
    pub steps: Option<Vec<StepDefinition>>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version.into()),
            steps: Some(Vec::new()),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.get_or_insert_with(Vec::new).push(step);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_devices(mut self, ids: &str) -> Self {
        self.device = Some(DeviceSpec {
            ids: parse_device_ids(ids),
        });
        self
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, FlowError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a flow file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Check the fields every flow must declare.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.name.as_deref().map_or(true, str::is_empty) {
            return Err(FlowError::Configuration("missing required field: name".into()));
        }
        if self.version.is_none() {
            return Err(FlowError::Configuration("missing required field: version".into()));
        }
        if self.steps.is_none() {
            return Err(FlowError::Configuration("missing required field: steps".into()));
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed flow")
    }

    pub fn steps(&self) -> &[StepDefinition] {
        self.steps.as_deref().unwrap_or_default()
    }

    /// Candidate device ids declared by this flow.
    pub fn candidate_devices(&self) -> Vec<String> {
        self.device.as_ref().map(|d| d.ids.clone()).unwrap_or_default()
    }
}

/// One step of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(default = "default_step_name")]
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Nested steps for `loop` / `for_each`
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub break_conditions: Vec<Condition>,
}

fn default_step_name() -> String {
    "unnamed step".to_string()
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            params: HashMap::new(),
            conditions: Vec::new(),
            steps: Vec::new(),
            break_conditions: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_break_condition(mut self, condition: Condition) -> Self {
        self.break_conditions.push(condition);
        self
    }
}

/// Candidate devices for a flow.
///
/// Accepts `{ip: "a, b"}`, `{ids: [a, b]}`, a bare CSV string or a bare list.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeviceSpec {
    pub ids: Vec<String>,
}

impl<'de> Deserialize<'de> for DeviceSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IdList {
            Csv(String),
            List(Vec<String>),
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyed {
                #[serde(alias = "ip", alias = "serial")]
                ids: IdList,
            },
            Bare(IdList),
        }

        let list = match Raw::deserialize(deserializer)? {
            Raw::Keyed { ids } => ids,
            Raw::Bare(ids) => ids,
        };
        let ids = match list {
            IdList::Csv(csv) => parse_device_ids(&csv),
            IdList::List(items) => items
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };
        Ok(DeviceSpec { ids })
    }
}

/// Split a comma separated device list, trimming and dropping blanks.
pub fn parse_device_ids(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionText {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Numeric versions keep their written form: `1` stays "1", `1.0` stays "1.0".
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<VersionText>::deserialize(deserializer)?.map(|version| match version {
        VersionText::Text(s) => s,
        VersionText::Int(n) => n.to_string(),
        VersionText::Float(n) => format!("{:?}", n),
    }))
}
