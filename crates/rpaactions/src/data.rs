use async_trait::async_trait;
use rpacore::{Action, ActionContext, ActionError, Value};
use rparuntime::{ActionFactory, ActionMetadata, ActionResources, ParamDefinition};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store a value in the flow's variable scope
pub struct SetVariableAction;

#[async_trait]
impl Action for SetVariableAction {
    fn action_type(&self) -> &str {
        "set_variable"
    }

    async fn execute(&self, mut ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let name = ctx.params.require_str("name")?.to_string();
        // An unresolved reference stores null rather than failing
        let value = ctx
            .params
            .raw("value")
            .cloned()
            .ok_or_else(|| ActionError::MissingParam("value".into()))?;

        tracing::debug!("set_variable {} = {}", name, value);
        ctx.variables.set(name, value);
        Ok(Value::Bool(true))
    }
}

pub struct SetVariableActionFactory;

impl ActionFactory for SetVariableActionFactory {
    fn create(&self, _resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(SetVariableAction))
    }

    fn action_type(&self) -> &str {
        "set_variable"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Set a flow variable".to_string(),
            category: "data".to_string(),
            params: vec![
                ParamDefinition::required("name", "Variable name"),
                ParamDefinition::required("value", "Value to store"),
            ],
        }
    }
}

/// Read a variable, falling back to `default`
pub struct GetVariableAction;

#[async_trait]
impl Action for GetVariableAction {
    fn action_type(&self) -> &str {
        "get_variable"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let name = ctx.params.require_str("name")?;
        let value = match ctx.variables.get(name) {
            Some(value) => value.clone(),
            None => ctx.params.get_or("default", Value::Null),
        };
        tracing::debug!("get_variable {} = {}", name, value);
        Ok(value)
    }
}

pub struct GetVariableActionFactory;

impl ActionFactory for GetVariableActionFactory {
    fn create(&self, _resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(GetVariableAction))
    }

    fn action_type(&self) -> &str {
        "get_variable"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Return the value of a flow variable".to_string(),
            category: "data".to_string(),
            params: vec![
                ParamDefinition::required("name", "Variable name"),
                ParamDefinition::optional("default", "Returned when the variable is unset"),
            ],
        }
    }
}

/// Append to a list variable, keeping at most `max_length` newest entries
pub struct AppendToListAction;

#[async_trait]
impl Action for AppendToListAction {
    fn action_type(&self) -> &str {
        "append_to_list"
    }

    async fn execute(&self, mut ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let list_name = ctx.params.require_str("list")?.to_string();
        let data = ctx
            .params
            .raw("data")
            .cloned()
            .ok_or_else(|| ActionError::MissingParam("data".into()))?;
        let max_length = match ctx.params.get("max_length") {
            Some(_) => Some(ctx.params.require_f64("max_length")?.max(0.0) as usize),
            None => None,
        };

        // Anything that is not already a list starts over
        let mut items = match ctx.variables.get(&list_name) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        items.push(data);
        if let Some(max) = max_length.filter(|max| *max > 0) {
            if items.len() > max {
                items.drain(..items.len() - max);
            }
        }

        tracing::debug!("append_to_list {} now holds {} items", list_name, items.len());
        ctx.variables.set(list_name, Value::Array(items));
        Ok(Value::Bool(true))
    }
}

pub struct AppendToListActionFactory;

impl ActionFactory for AppendToListActionFactory {
    fn create(&self, _resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(AppendToListAction))
    }

    fn action_type(&self) -> &str {
        "append_to_list"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Append an item to a list variable".to_string(),
            category: "data".to_string(),
            params: vec![
                ParamDefinition::required("list", "Name of the list variable"),
                ParamDefinition::required("data", "Item to append"),
                ParamDefinition::optional("max_length", "Keep only the newest N items"),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Yaml,
    Csv,
}

impl ExportFormat {
    fn parse(s: &str) -> Result<Self, ActionError> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ActionError::invalid("format", "json, yaml or csv", other)),
        }
    }
}

/// Write collected data to a file
pub struct ExportDataAction {
    output_dir: PathBuf,
}

impl ExportDataAction {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn target_path(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }
}

#[async_trait]
impl Action for ExportDataAction {
    fn action_type(&self) -> &str {
        "export_data"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let filename = ctx.params.require_str("filename")?;
        let format = ExportFormat::parse(ctx.params.get_str("format").unwrap_or("json"))?;

        // A bare string names the variable holding the data
        let data = match ctx.params.require("data")? {
            Value::String(name) => ctx.variables.lookup(name).cloned().unwrap_or_else(|| Value::from(name.as_str())),
            other => other.clone(),
        };

        let content = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&serde_json::Value::from(&data))
                .map_err(|e| ActionError::ExecutionFailed(format!("JSON export failed: {}", e)))?,
            ExportFormat::Yaml => serde_yaml::to_string(&data)
                .map_err(|e| ActionError::ExecutionFailed(format!("YAML export failed: {}", e)))?,
            ExportFormat::Csv => to_csv(&data)?,
        };

        let path = self.target_path(filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ActionError::ExecutionFailed(format!("Cannot create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ActionError::ExecutionFailed(format!("Cannot write {}: {}", path.display(), e)))?;

        let records = data.as_array().map_or(1, Vec::len);
        ctx.events.info(format!("Exported {} records to {}", records, path.display()));
        Ok(Value::Bool(true))
    }
}

/// Rows must be maps; the header is the sorted union of their keys.
fn to_csv(data: &Value) -> Result<String, ActionError> {
    let rows = data
        .as_array()
        .ok_or_else(|| ActionError::invalid("data", "list of records for csv", data.kind()))?;

    let mut fields = BTreeSet::new();
    for row in rows {
        let record = row
            .as_object()
            .ok_or_else(|| ActionError::invalid("data", "list of records for csv", row.kind()))?;
        fields.extend(record.keys().cloned());
    }

    let csv_error = |e: csv::Error| ActionError::ExecutionFailed(format!("CSV export failed: {}", e));
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    writer.write_record(&fields).map_err(csv_error)?;
    for row in rows {
        let record = row.as_object();
        let cells = fields.iter().map(|field| {
            record
                .and_then(|r| r.get(field))
                .map(|v| v.to_string())
                .unwrap_or_default()
        });
        writer.write_record(cells).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ActionError::ExecutionFailed(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ActionError::ExecutionFailed(format!("CSV export failed: {}", e)))
}

pub struct ExportDataActionFactory;

impl ActionFactory for ExportDataActionFactory {
    fn create(&self, resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(ExportDataAction::new(resources.output_dir.clone())))
    }

    fn action_type(&self) -> &str {
        "export_data"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Export data to a json, yaml or csv file".to_string(),
            category: "data".to_string(),
            params: vec![
                ParamDefinition::required("data", "Data, or the name of the variable holding it"),
                ParamDefinition::required("filename", "Output path, relative to the output directory"),
                ParamDefinition::optional("format", "json (default), yaml or csv"),
            ],
        }
    }
}
