use crate::config::RuntimeConfig;
use crate::engine::{ExecutionReport, FlowEngine};
use crate::notify::{LogNotifier, NotificationSink, WebhookNotifier};
use crate::pool::DevicePool;
use crate::registry::{ActionRegistry, ActionResources};
use rpacore::{
    DeviceDriver, DeviceError, DeviceProbe, EventBus, ExecutionEvent, FlowDefinition, FlowError,
    TextRecognizer, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Builds a driver bound to a claimed device
pub trait DriverFactory: Send + Sync {
    fn connect(&self, device_id: &str) -> Result<Arc<dyn DeviceDriver>, DeviceError>;
}

/// Per-run knobs
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Candidate ids to use instead of the flow's `device` section
    pub devices: Option<String>,
    /// Merged over the flow's variables
    pub variables: HashMap<String, Value>,
    /// Top-level step to resume from
    pub start_step: usize,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// No candidate device could be claimed; nothing ran
    NoDevice,
    Finished(ExecutionReport),
}

/// Main runtime for executing flows
///
/// Owns the shared action registry and device pool. Each run claims a
/// device, drives its own [`FlowEngine`] and hands the device back.
#[derive(Clone)]
pub struct FlowRuntime {
    registry: Arc<ActionRegistry>,
    pool: DevicePool,
    drivers: Arc<dyn DriverFactory>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    notifier: Arc<dyn NotificationSink>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    pub fn new(
        registry: ActionRegistry,
        probe: Arc<dyn DeviceProbe>,
        drivers: Arc<dyn DriverFactory>,
        config: RuntimeConfig,
    ) -> Self {
        let pool = DevicePool::with_config(probe, config.pool_config());
        let notifier: Arc<dyn NotificationSink> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        };

        Self {
            registry: Arc::new(registry),
            pool,
            drivers,
            recognizer: None,
            notifier,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            config,
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Replace the sink chosen from `webhook_url`
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Claim a device, run the flow on it and hand the device back
    ///
    /// The device is released after a successful run and quarantined after
    /// a failed or interrupted one.
    pub async fn run_flow(&self, flow: &FlowDefinition, options: RunOptions) -> Result<RunOutcome, FlowError> {
        flow.validate()?;

        let candidates = match &options.devices {
            Some(ids) => rpacore::parse_device_ids(ids),
            None => flow.candidate_devices(),
        };
        if candidates.is_empty() {
            return Err(FlowError::Configuration(format!(
                "flow {} declares no devices",
                flow.display_name()
            )));
        }

        let Some(device_id) = self.pool.claim(&candidates).await else {
            tracing::warn!("No device available for flow {} among {:?}", flow.display_name(), candidates);
            return Ok(RunOutcome::NoDevice);
        };
        let lease = DeviceLease::new(self.pool.clone(), device_id);

        let driver = match self.drivers.connect(lease.id()) {
            Ok(driver) => driver,
            Err(e) => {
                tracing::error!("Could not connect to device {}: {}", lease.id(), e);
                lease.quarantine();
                return Err(FlowError::Configuration(e.to_string()));
            }
        };

        let mut resources = ActionResources::new(driver).with_output_dir(self.config.output_dir.clone());
        if let Some(recognizer) = &self.recognizer {
            resources = resources.with_recognizer(recognizer.clone());
        }

        let mut engine = FlowEngine::new(self.registry.clone(), resources)
            .with_events(self.event_bus.clone())
            .with_notifier(self.notifier.clone())
            .with_variables(options.variables)
            .with_app_name(self.config.app_name.clone());

        match engine.run_from(flow, options.start_step).await {
            Ok(report) => {
                lease.release().await;
                Ok(RunOutcome::Finished(report))
            }
            Err(e) => {
                lease.quarantine();
                Err(e)
            }
        }
    }

    /// Run a flow on its own task
    pub fn spawn_flow(
        &self,
        flow: FlowDefinition,
        options: RunOptions,
    ) -> JoinHandle<Result<RunOutcome, FlowError>> {
        let runtime = self.clone();
        tokio::spawn(async move { runtime.run_flow(&flow, options).await })
    }
}

/// A claimed device that must go back to the pool
///
/// Dropping the lease without releasing it (a panicking action, an aborted
/// task) quarantines the device so it is not stuck as `Busy`.
struct DeviceLease {
    pool: DevicePool,
    id: String,
    settled: bool,
}

impl DeviceLease {
    fn new(pool: DevicePool, id: String) -> Self {
        Self {
            pool,
            id,
            settled: false,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn release(mut self) {
        self.pool.release_device(&self.id).await;
        self.settled = true;
    }

    fn quarantine(mut self) {
        self.pool.add_error_task_device(&self.id);
        self.settled = true;
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if !self.settled {
            tracing::error!("Run on device {} ended abnormally", self.id);
            self.pool.add_error_task_device(&self.id);
        }
    }
}
