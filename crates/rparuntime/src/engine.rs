use crate::notify::{NotificationSink, StepFailure};
use crate::registry::{ActionRegistry, ActionResources};
use chrono::Utc;
use futures::future::BoxFuture;
use rpacore::{
    Action, ActionContext, ActionError, Condition, EventBus, ExecutionEvent, ExecutionId,
    FlowDefinition, FlowError, Params, StepDefinition, StepResultStore, Value, VariableStore,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Built-in control actions handled by the engine itself
pub const LOOP_ACTION: &str = "loop";
pub const FOR_EACH_ACTION: &str = "for_each";
pub const BREAK_ACTION: &str = "break";
pub const CONTINUE_ACTION: &str = "continue";
pub const CONTROL_ACTIONS: [&str; 4] = [LOOP_ACTION, FOR_EACH_ACTION, BREAK_ACTION, CONTINUE_ACTION];

const DEFAULT_MAX_ITERATIONS: f64 = 100.0;

/// Lifecycle of one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Validating,
    Running,
    Completed,
    Aborted,
}

/// Signal returned by the per-step executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Normal,
    /// Skip the rest of the current loop iteration
    Continue,
    /// Leave the innermost loop
    Break,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub flow_name: String,
    pub status: EngineState,
    pub executed_steps: usize,
    pub skipped_steps: usize,
    pub duration_ms: u64,
    pub results: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
}

/// Interprets a flow against one bound device
///
/// The engine owns the execution's variable and step-result scopes and
/// caches one action instance per action type for its whole lifetime.
/// Steps run strictly in declaration order; the first failing step aborts
/// the run after it is logged and reported to the notification sink.
pub struct FlowEngine {
    registry: Arc<ActionRegistry>,
    resources: ActionResources,
    instances: HashMap<String, Arc<dyn Action>>,
    variables: VariableStore,
    results: StepResultStore,
    overrides: HashMap<String, Value>,
    state: EngineState,
    events: Arc<EventBus>,
    notifier: Option<Arc<dyn NotificationSink>>,
    execution_id: ExecutionId,
    flow_name: String,
    app_name: String,
    step_index: usize,
    executed: usize,
    skipped: usize,
}

impl FlowEngine {
    pub fn new(registry: Arc<ActionRegistry>, resources: ActionResources) -> Self {
        Self {
            registry,
            resources,
            instances: HashMap::new(),
            variables: VariableStore::new(),
            results: StepResultStore::new(),
            overrides: HashMap::new(),
            state: EngineState::Idle,
            events: Arc::new(EventBus::default()),
            notifier: None,
            execution_id: Uuid::nil(),
            flow_name: String::new(),
            app_name: String::new(),
            step_index: 0,
            executed: 0,
            skipped: 0,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Variables merged over the flow's seed variables (these win)
    pub fn with_variables(mut self, overrides: HashMap<String, Value>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Fallback app name for failure notifications
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn results(&self) -> &StepResultStore {
        &self.results
    }

    pub fn device_id(&self) -> &str {
        self.resources.device_id()
    }

    /// Run every step of the flow
    pub async fn run(&mut self, flow: &FlowDefinition) -> Result<ExecutionReport, FlowError> {
        self.run_from(flow, 0).await
    }

    /// Run the flow starting at a top-level step index (resume)
    pub async fn run_from(
        &mut self,
        flow: &FlowDefinition,
        start_step_index: usize,
    ) -> Result<ExecutionReport, FlowError> {
        self.state = EngineState::Validating;
        if let Err(e) = flow.validate() {
            tracing::error!("Flow validation failed: {}", e);
            self.state = EngineState::Aborted;
            return Err(e);
        }

        self.reset_scope(flow);
        self.state = EngineState::Running;

        self.events.emit(ExecutionEvent::FlowStarted {
            execution_id: self.execution_id,
            flow_name: self.flow_name.clone(),
            device_id: self.device_id().to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Starting flow {} on device {} from step {}",
            self.flow_name,
            self.device_id(),
            start_step_index
        );

        let start_time = Instant::now();
        let outcome = self.run_top_level(flow.steps(), start_step_index).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        self.events.emit(ExecutionEvent::FlowCompleted {
            execution_id: self.execution_id,
            success: outcome.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match outcome {
            Ok(()) => {
                self.state = EngineState::Completed;
                tracing::info!("Flow {} completed in {}ms", self.flow_name, duration_ms);
                Ok(ExecutionReport {
                    execution_id: self.execution_id,
                    flow_name: self.flow_name.clone(),
                    status: self.state,
                    executed_steps: self.executed,
                    skipped_steps: self.skipped,
                    duration_ms,
                    results: self.results.snapshot(),
                    variables: self.variables.snapshot(),
                })
            }
            Err(e) => {
                self.state = EngineState::Aborted;
                tracing::error!("Flow {} aborted: {}", self.flow_name, e);
                Err(e)
            }
        }
    }

    fn reset_scope(&mut self, flow: &FlowDefinition) {
        let mut variables = VariableStore::with_seed(flow.variables.clone())
            .with_context(flow.prerequisites.clone().unwrap_or_default());
        variables.extend(self.overrides.clone());
        self.variables = variables;
        self.results = StepResultStore::new();
        self.execution_id = Uuid::new_v4();
        self.flow_name = flow.display_name().to_string();
        if let Some(app_name) = &flow.app_name {
            self.app_name = app_name.clone();
        }
        self.step_index = 0;
        self.executed = 0;
        self.skipped = 0;
    }

    async fn run_top_level(&mut self, steps: &[StepDefinition], start: usize) -> Result<(), FlowError> {
        for (index, step) in steps.iter().enumerate().skip(start) {
            self.step_index = index;
            match self.execute_step(step).await? {
                ControlFlow::Normal => {}
                signal => {
                    tracing::warn!("Step {} signalled {:?} outside of a loop, ignored", step.name, signal);
                }
            }
        }
        Ok(())
    }

    fn execute_block<'a>(
        &'a mut self,
        steps: &'a [StepDefinition],
    ) -> BoxFuture<'a, Result<ControlFlow, FlowError>> {
        Box::pin(async move {
            for step in steps {
                match self.execute_step(step).await? {
                    ControlFlow::Normal => {}
                    signal => return Ok(signal),
                }
            }
            Ok(ControlFlow::Normal)
        })
    }

    /// Whether every condition gating the step holds
    pub fn should_execute(&self, step: &StepDefinition) -> bool {
        Condition::all(&step.conditions, &self.variables, &self.results)
    }

    async fn execute_step(&mut self, step: &StepDefinition) -> Result<ControlFlow, FlowError> {
        if !self.should_execute(step) {
            tracing::info!("Skipping step {}: conditions not met", step.name);
            self.skipped += 1;
            self.events.emit(ExecutionEvent::StepSkipped {
                execution_id: self.execution_id,
                step_index: self.step_index,
                step_name: step.name.clone(),
                timestamp: Utc::now(),
            });
            return Ok(ControlFlow::Normal);
        }

        tracing::info!("Executing step: {} (action: {})", step.name, step.action);
        self.events.emit(ExecutionEvent::StepStarted {
            execution_id: self.execution_id,
            step_index: self.step_index,
            step_name: step.name.clone(),
            action: step.action.clone(),
            timestamp: Utc::now(),
        });
        let start = Instant::now();

        let (result, signal) = match step.action.as_str() {
            LOOP_ACTION => (self.run_loop(step).await?, ControlFlow::Normal),
            FOR_EACH_ACTION => (self.run_for_each(step).await?, ControlFlow::Normal),
            BREAK_ACTION => (Value::Bool(true), ControlFlow::Break),
            CONTINUE_ACTION => (Value::Bool(true), ControlFlow::Continue),
            _ => (self.dispatch(step).await?, ControlFlow::Normal),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!("Step {} returned {:?} in {}ms", step.name, result, duration_ms);
        self.events.emit(ExecutionEvent::StepCompleted {
            execution_id: self.execution_id,
            step_index: self.step_index,
            step_name: step.name.clone(),
            result: result.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
        self.results.record(step.name.clone(), result);
        self.executed += 1;
        Ok(signal)
    }

    fn action_for(&mut self, action_type: &str) -> Result<Arc<dyn Action>, FlowError> {
        if let Some(action) = self.instances.get(action_type) {
            return Ok(action.clone());
        }
        let action = self.registry.create_action(action_type, &self.resources)?;
        self.instances.insert(action_type.to_string(), action.clone());
        Ok(action)
    }

    async fn dispatch(&mut self, step: &StepDefinition) -> Result<Value, FlowError> {
        let action = match self.action_for(&step.action) {
            Ok(action) => action,
            Err(e) => {
                self.fail(step, &e).await;
                return Err(e);
            }
        };

        let params = self.variables.resolve_map(&step.params);
        let events = self.events.create_emitter(self.execution_id, &step.name);
        let ctx = ActionContext::new(&step.name, params, &mut self.variables, events);

        match action.execute(ctx).await {
            Ok(value) => Ok(value),
            Err(source) => {
                let err = FlowError::ActionExecution {
                    step: step.name.clone(),
                    source,
                };
                self.fail(step, &err).await;
                Err(err)
            }
        }
    }

    async fn control_param_error(&self, step: &StepDefinition, source: ActionError) -> FlowError {
        let err = FlowError::ActionExecution {
            step: step.name.clone(),
            source,
        };
        self.fail(step, &err).await;
        err
    }

    fn loop_should_stop(&self, step: &StepDefinition) -> bool {
        Condition::any(&step.break_conditions, &self.variables, &self.results)
    }

    async fn run_loop(&mut self, step: &StepDefinition) -> Result<Value, FlowError> {
        let params = Params::new(self.variables.resolve_map(&step.params));
        let max_iterations = match params.get_f64_or("max_iterations", DEFAULT_MAX_ITERATIONS) {
            Ok(n) => n.max(0.0) as u64,
            Err(e) => return Err(self.control_param_error(step, e).await),
        };

        tracing::info!("Starting loop {}, max iterations: {}", step.name, max_iterations);
        let mut iteration = 0;
        while iteration < max_iterations {
            if self.loop_should_stop(step) {
                tracing::info!("Loop {}: break condition met", step.name);
                break;
            }
            iteration += 1;
            tracing::debug!("Loop {} iteration {}/{}", step.name, iteration, max_iterations);

            if self.execute_block(&step.steps).await? == ControlFlow::Break {
                tracing::info!("Loop {}: break", step.name);
                break;
            }
        }
        tracing::info!("Loop {} finished after {} iterations", step.name, iteration);
        Ok(Value::Bool(true))
    }

    async fn run_for_each(&mut self, step: &StepDefinition) -> Result<Value, FlowError> {
        let params = Params::new(self.variables.resolve_map(&step.params));
        let items = match params.raw("items") {
            None => {
                return Err(self
                    .control_param_error(step, ActionError::MissingParam("items".into()))
                    .await)
            }
            Some(Value::Null) => {
                tracing::warn!("for_each {}: items resolved to nothing, skipping", step.name);
                Vec::new()
            }
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                let err = ActionError::invalid("items", "list", other.kind());
                return Err(self.control_param_error(step, err).await);
            }
        };
        let item_var = params.get_str("item_var").unwrap_or("item").to_string();
        let index_var = params.get_str("index_var").unwrap_or("index").to_string();

        tracing::info!("Starting for_each {} over {} items", step.name, items.len());
        for (index, item) in items.into_iter().enumerate() {
            if self.loop_should_stop(step) {
                tracing::info!("for_each {}: break condition met", step.name);
                break;
            }
            self.variables.set(item_var.clone(), item);
            self.variables.set(index_var.clone(), index);

            if self.execute_block(&step.steps).await? == ControlFlow::Break {
                tracing::info!("for_each {}: break", step.name);
                break;
            }
        }
        Ok(Value::Bool(true))
    }

    async fn fail(&self, step: &StepDefinition, error: &FlowError) {
        tracing::error!("Step {} (action {}) failed: {}", step.name, step.action, error);

        self.events.emit(ExecutionEvent::StepFailed {
            execution_id: self.execution_id,
            step_index: self.step_index,
            step_name: step.name.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        if let Some(notifier) = &self.notifier {
            let error_message = match error {
                FlowError::ActionExecution { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            notifier
                .notify(&StepFailure {
                    flow_name: self.flow_name.clone(),
                    app_name: self.app_name.clone(),
                    step_name: step.name.clone(),
                    step_index: self.step_index,
                    error_message,
                })
                .await;
        }
    }
}

/// Action types used by a flow that neither the registry nor the engine knows
pub fn find_unknown_actions(steps: &[StepDefinition], registry: &ActionRegistry) -> Vec<String> {
    let mut unknown = Vec::new();
    collect_unknown(steps, registry, &mut unknown);
    unknown.sort();
    unknown.dedup();
    unknown
}

fn collect_unknown(steps: &[StepDefinition], registry: &ActionRegistry, out: &mut Vec<String>) {
    for step in steps {
        if !CONTROL_ACTIONS.contains(&step.action.as_str()) && !registry.contains(&step.action) {
            out.push(step.action.clone());
        }
        collect_unknown(&step.steps, registry, out);
    }
}
