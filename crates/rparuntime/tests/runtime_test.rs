// crates/rparuntime/tests/runtime_test.rs

use async_trait::async_trait;
use rpacore::{
    Action, ActionContext, ActionError, DeviceDriver, DeviceError, DeviceProbe, FlowDefinition,
    FlowError, StepDefinition, Value,
};
use rparuntime::{
    ActionFactory, ActionRegistry, ActionResources, DeviceSource, DeviceStatus, DriverFactory,
    FlowDirectorySource, FlowRuntime, RunOptions, RunOutcome, RuntimeConfig,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

struct FakeDevice {
    serial: String,
}

#[async_trait]
impl DeviceDriver for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }
    async fn click(&self, _x: i64, _y: i64) -> Result<(), DeviceError> {
        Ok(())
    }
    async fn swipe(&self, _s: (i64, i64), _e: (i64, i64), _d: u64) -> Result<(), DeviceError> {
        Ok(())
    }
    async fn window_size(&self) -> Result<(i64, i64), DeviceError> {
        Ok((1080, 1920))
    }
    async fn input_text(&self, _text: &str) -> Result<(), DeviceError> {
        Ok(())
    }
    async fn press_back(&self) -> Result<(), DeviceError> {
        Ok(())
    }
    async fn app_start(&self, _package: &str) -> Result<(), DeviceError> {
        Ok(())
    }
    async fn app_stop(&self, _package: &str) -> Result<(), DeviceError> {
        Ok(())
    }
    async fn screenshot(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(Vec::new())
    }
}

struct FakeDrivers;

impl DriverFactory for FakeDrivers {
    fn connect(&self, device_id: &str) -> Result<Arc<dyn DeviceDriver>, DeviceError> {
        Ok(Arc::new(FakeDevice {
            serial: device_id.to_string(),
        }))
    }
}

struct AlwaysUp;

#[async_trait]
impl DeviceProbe for AlwaysUp {
    async fn probe(&self, _device_id: &str) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Returns the serial of the device it runs on
struct WhereAmI {
    serial: String,
}

#[async_trait]
impl Action for WhereAmI {
    fn action_type(&self) -> &str {
        "where_am_i"
    }
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let greeting = ctx.params.get_str("prefix").unwrap_or("");
        Ok(Value::from(format!("{}{}", greeting, self.serial)))
    }
}

struct WhereAmIFactory;

impl ActionFactory for WhereAmIFactory {
    fn create(&self, resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(WhereAmI {
            serial: resources.device_id().to_string(),
        }))
    }
    fn action_type(&self) -> &str {
        "where_am_i"
    }
}

/// Panics, or hangs when `hang` is set
struct Misbehave;

#[async_trait]
impl Action for Misbehave {
    fn action_type(&self) -> &str {
        "misbehave"
    }
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        if ctx.params.contains("hang") {
            std::future::pending::<()>().await;
        }
        panic!("action crashed");
    }
}

struct MisbehaveFactory;

impl ActionFactory for MisbehaveFactory {
    fn create(&self, _resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok(Arc::new(Misbehave))
    }
    fn action_type(&self) -> &str {
        "misbehave"
    }
}

fn runtime() -> FlowRuntime {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(WhereAmIFactory));
    registry.register(Arc::new(MisbehaveFactory));
    FlowRuntime::new(registry, Arc::new(AlwaysUp), Arc::new(FakeDrivers), RuntimeConfig::default())
}

fn flow(devices: &str) -> FlowDefinition {
    FlowDefinition::new("locate", "1")
        .with_devices(devices)
        .with_step(StepDefinition::new("where", "where_am_i").with_param("prefix", "${prefix}"))
}

#[tokio::test]
async fn test_run_flow_releases_device() {
    init_tracing();
    let runtime = runtime();

    let outcome = runtime.run_flow(&flow("dev1"), RunOptions::default()).await.unwrap();

    let RunOutcome::Finished(report) = outcome else {
        panic!("expected a finished run");
    };
    assert_eq!(report.results["where"], Value::from("dev1"));
    assert_eq!(runtime.pool().status("dev1"), Some(DeviceStatus::Available));
}

#[tokio::test]
async fn test_run_flow_quarantines_on_failure() {
    let runtime = runtime();
    let broken = flow("dev1").with_step(StepDefinition::new("boom", "self_destruct"));

    let err = runtime.run_flow(&broken, RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, FlowError::ActionNotFound(_)));
    assert!(runtime.pool().is_quarantined("dev1"));
    let outcome = runtime.run_flow(&flow("dev1"), RunOptions::default()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::NoDevice));
}

#[tokio::test]
async fn test_panicking_action_quarantines_device() {
    let runtime = runtime();
    let crashing = flow("dev1").with_step(StepDefinition::new("crash", "misbehave"));

    let err = runtime.spawn_flow(crashing, RunOptions::default()).await.unwrap_err();

    assert!(err.is_panic());
    assert!(runtime.pool().is_quarantined("dev1"));
    let outcome = runtime.run_flow(&flow("dev1"), RunOptions::default()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::NoDevice));
}

#[tokio::test]
async fn test_aborted_run_quarantines_device() {
    let runtime = runtime();
    let hanging = flow("dev1").with_step(StepDefinition::new("hang", "misbehave").with_param("hang", true));

    let handle = runtime.spawn_flow(hanging, RunOptions::default());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(runtime.pool().status("dev1"), Some(DeviceStatus::Busy));

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(runtime.pool().is_quarantined("dev1"));
}

#[tokio::test]
async fn test_invalid_flow_claims_nothing() {
    let runtime = runtime();
    let mut flow = flow("dev1");
    flow.steps = None;

    let err = runtime.run_flow(&flow, RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, FlowError::Configuration(_)));
    assert!(runtime.pool().device_ids().is_empty());
}

#[tokio::test]
async fn test_options_override_devices_and_variables() {
    let runtime = runtime();
    let mut variables = HashMap::new();
    variables.insert("prefix".to_string(), Value::from("on "));
    let options = RunOptions {
        devices: Some("dev9".to_string()),
        variables,
        start_step: 0,
    };

    let outcome = runtime.run_flow(&flow("dev1"), options).await.unwrap();

    let RunOutcome::Finished(report) = outcome else {
        panic!("expected a finished run");
    };
    assert_eq!(report.results["where"], Value::from("on dev9"));
    assert_eq!(runtime.pool().status("dev1"), None);
}

#[tokio::test]
async fn test_spawned_flows_get_distinct_devices() {
    let runtime = runtime();
    let first = runtime.spawn_flow(flow("dev1,dev2"), RunOptions::default());
    let second = runtime.spawn_flow(flow("dev1,dev2"), RunOptions::default());

    let mut devices = Vec::new();
    for handle in [first, second] {
        match handle.await.unwrap().unwrap() {
            RunOutcome::Finished(report) => devices.push(report.results["where"].to_string()),
            RunOutcome::NoDevice => panic!("two candidates for two runs"),
        }
    }

    assert_eq!(devices.len(), 2);
    for id in ["dev1", "dev2"] {
        assert_ne!(runtime.pool().status(id), Some(DeviceStatus::Busy));
    }
}

#[test]
fn test_flow_directory_source_collects_devices() {
    let root = tempfile::tempdir().unwrap();
    let flows = root.path().join("flows");
    let nested = root.path().join("tests/flows");
    std::fs::create_dir_all(&flows).unwrap();
    std::fs::create_dir_all(&nested).unwrap();

    std::fs::write(
        flows.join("a.yaml"),
        "name: a\nversion: 1\ndevice:\n  ip: \"dev1,dev2\"\nsteps: []\n",
    )
    .unwrap();
    std::fs::write(
        nested.join("b.yml"),
        "name: b\nversion: 1\ndevice:\n  ip: \"dev2, dev3\"\nsteps: []\n",
    )
    .unwrap();
    std::fs::write(flows.join("broken.yaml"), "name: [unclosed").unwrap();
    std::fs::write(flows.join("notes.txt"), "device: dev4").unwrap();

    let source = FlowDirectorySource::new(vec![flows, nested, root.path().join("missing")]);

    assert_eq!(
        source.declared_devices(),
        vec!["dev1".to_string(), "dev2".to_string(), "dev3".to_string()]
    );
}

#[test]
fn test_runtime_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = dir.path().join("rpa.yaml");
    std::fs::write(&yaml, "webhook_url: http://hooks.local/rpa\nquarantine_grace_secs: 30\n").unwrap();

    let config = RuntimeConfig::from_file(&yaml).unwrap();
    assert_eq!(config.webhook_url.as_deref(), Some("http://hooks.local/rpa"));
    assert_eq!(config.quarantine_grace_secs, 30);
    assert_eq!(config.health_check_interval_secs, 10);
    assert_eq!(config.pool_config().quarantine_grace.as_secs(), 30);

    let json = dir.path().join("rpa.json");
    std::fs::write(&json, r#"{"app_name": "store", "adb_path": "/opt/adb"}"#).unwrap();
    let config = RuntimeConfig::from_file(&json).unwrap();
    assert_eq!(config.app_name, "store");
    assert_eq!(config.adb_path, "/opt/adb");
    assert_eq!(config.reconcile_interval_secs, 600);
}
