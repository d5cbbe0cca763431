use async_trait::async_trait;
use rpacore::{Action, ActionContext, ActionError, Value};
use rparuntime::{ActionFactory, ActionMetadata, ActionResources, ParamDefinition};
use std::sync::Arc;
use tokio::time::sleep;

/// Pause the flow for a number of seconds
pub struct SleepAction;

#[async_trait]
impl Action for SleepAction {
    fn action_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let duration = ctx.params.require_secs("seconds")?;

        ctx.events.info(format!("Sleeping for {:?}", duration));
        sleep(duration).await;
        Ok(Value::Bool(true))
    }
}

pub struct SleepActionFactory;

impl ActionFactory for SleepActionFactory {
    fn create(&self, _resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(SleepAction))
    }

    fn action_type(&self) -> &str {
        "sleep"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Wait for the given number of seconds".to_string(),
            category: "utility".to_string(),
            params: vec![ParamDefinition::required("seconds", "Seconds to wait, fractions allowed")],
        }
    }
}
