use async_trait::async_trait;
use rpacore::{Action, ActionContext, ActionError, Value};
use rparuntime::{ActionFactory, ActionMetadata, ActionResources, ParamDefinition};
use std::sync::Arc;

/// Write a message to the flow log and event stream
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    fn action_type(&self) -> &str {
        "log"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let message = ctx
            .params
            .get("message")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(no message)".to_string());

        match ctx.params.get_str("level").unwrap_or("info") {
            "warn" | "warning" => ctx.events.warn(message.clone()),
            "error" => {
                tracing::error!(step = ctx.step_name, "{}", message);
                ctx.events.warn(message.clone());
            }
            "debug" => tracing::debug!(step = ctx.step_name, "{}", message),
            _ => {
                tracing::info!(step = ctx.step_name, "{}", message);
                ctx.events.info(message.clone());
            }
        }

        Ok(Value::String(message))
    }
}

pub struct LogActionFactory;

impl ActionFactory for LogActionFactory {
    fn create(&self, _resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(LogAction))
    }

    fn action_type(&self) -> &str {
        "log"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Log a message".to_string(),
            category: "utility".to_string(),
            params: vec![
                ParamDefinition::required("message", "Text to log, may reference variables"),
                ParamDefinition::optional("level", "debug, info (default), warn or error"),
            ],
        }
    }
}
