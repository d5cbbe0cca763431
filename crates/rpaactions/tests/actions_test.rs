// crates/rpaactions/tests/actions_test.rs

use async_trait::async_trait;
use parking_lot::Mutex;
use rpaactions::register_all;
use rpacore::{
    ActionError, Condition, DeviceDriver, DeviceError, FlowDefinition, FlowError, Region,
    StepDefinition, TextMatch, TextRecognizer, Value,
};
use rparuntime::{ActionRegistry, ActionResources, ExecutionReport, FlowEngine};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct FakeDevice {
    calls: Mutex<Vec<String>>,
}

impl FakeDevice {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> Result<(), DeviceError> {
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for FakeDevice {
    fn serial(&self) -> &str {
        "dev1"
    }
    async fn click(&self, x: i64, y: i64) -> Result<(), DeviceError> {
        self.record(format!("click {} {}", x, y))
    }
    async fn swipe(&self, s: (i64, i64), e: (i64, i64), d: u64) -> Result<(), DeviceError> {
        self.record(format!("swipe {} {} {} {} {}", s.0, s.1, e.0, e.1, d))
    }
    async fn window_size(&self) -> Result<(i64, i64), DeviceError> {
        Ok((1080, 1920))
    }
    async fn input_text(&self, text: &str) -> Result<(), DeviceError> {
        self.record(format!("text {}", text))
    }
    async fn press_back(&self) -> Result<(), DeviceError> {
        self.record("back".to_string())
    }
    async fn app_start(&self, package: &str) -> Result<(), DeviceError> {
        self.record(format!("start {}", package))
    }
    async fn app_stop(&self, package: &str) -> Result<(), DeviceError> {
        self.record(format!("stop {}", package))
    }
    async fn screenshot(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

/// Returns `screen` once `appear_after` screenshots have been read
struct FakeRecognizer {
    screen: Vec<TextMatch>,
    appear_after: usize,
    reads: AtomicUsize,
    regions: Mutex<Vec<Option<Region>>>,
}

impl FakeRecognizer {
    fn new(screen: Vec<TextMatch>) -> Self {
        Self {
            screen,
            appear_after: 0,
            reads: AtomicUsize::new(0),
            regions: Mutex::new(Vec::new()),
        }
    }

    fn delayed(mut self, reads: usize) -> Self {
        self.appear_after = reads;
        self
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, _png: &[u8], region: Option<Region>) -> Result<Vec<TextMatch>, ActionError> {
        self.regions.lock().push(region);
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if read < self.appear_after {
            return Ok(Vec::new());
        }
        Ok(self.screen.clone())
    }
}

fn text(text: &str, bounds: Region) -> TextMatch {
    TextMatch {
        text: text.to_string(),
        bounds,
        confidence: 0.95,
    }
}

fn registry() -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    register_all(&mut registry);
    Arc::new(registry)
}

fn engine(device: Arc<FakeDevice>, recognizer: Option<Arc<FakeRecognizer>>, output: &Path) -> FlowEngine {
    let mut resources = ActionResources::new(device).with_output_dir(output);
    if let Some(recognizer) = recognizer {
        resources = resources.with_recognizer(recognizer);
    }
    FlowEngine::new(registry(), resources)
}

async fn run(flow: FlowDefinition) -> (ExecutionReport, Arc<FakeDevice>) {
    let device = Arc::new(FakeDevice::default());
    let dir = tempfile::tempdir().unwrap();
    let report = engine(device.clone(), None, dir.path()).run(&flow).await.unwrap();
    (report, device)
}

fn flow() -> FlowDefinition {
    FlowDefinition::new("x", "1")
}

fn list(items: Vec<Value>) -> Value {
    Value::Array(items)
}

fn record(pairs: &[(&str, Value)]) -> Value {
    Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<HashMap<_, _>>())
}

#[tokio::test]
async fn test_set_then_get_gated_on_step_result() {
    let flow = flow()
        .with_step(
            StepDefinition::new("s1", "set_variable")
                .with_param("name", "a")
                .with_param("value", "1"),
        )
        .with_step(
            StepDefinition::new("s2", "get_variable")
                .with_param("name", "a")
                .with_condition(Condition::step_result("s1", true)),
        );

    let (report, _) = run(flow).await;

    assert_eq!(report.results["s1"], Value::Bool(true));
    assert_eq!(report.results["s2"], Value::from("1"));
}

#[tokio::test]
async fn test_set_variable_keeps_unresolved_as_null() {
    let flow = flow().with_step(
        StepDefinition::new("s", "set_variable")
            .with_param("name", "a")
            .with_param("value", "${missing}"),
    );

    let (report, _) = run(flow).await;

    assert_eq!(report.variables.get("a"), Some(&Value::Null));
}

#[tokio::test]
async fn test_get_variable_default() {
    let flow = flow().with_step(
        StepDefinition::new("g", "get_variable")
            .with_param("name", "absent")
            .with_param("default", 7),
    );

    let (report, _) = run(flow).await;

    assert_eq!(report.results["g"], Value::from(7));
}

#[tokio::test]
async fn test_append_to_list_trims_to_max_length() {
    let append = |name: &str, data: &str| {
        StepDefinition::new(name, "append_to_list")
            .with_param("list", "seen")
            .with_param("data", data)
            .with_param("max_length", 2)
    };
    let flow = flow()
        .with_step(append("a", "tea"))
        .with_step(append("b", "coffee"))
        .with_step(append("c", "mocha"));

    let (report, _) = run(flow).await;

    assert_eq!(report.variables["seen"], list(vec!["coffee".into(), "mocha".into()]));
}

#[tokio::test]
async fn test_export_data_formats() {
    let dir = tempfile::tempdir().unwrap();
    let rows = list(vec![
        record(&[("name", "tea".into()), ("price", 3.into())]),
        record(&[("name", "milk, oat".into())]),
    ]);
    let export = |name: &str, filename: &str, format: &str| {
        StepDefinition::new(name, "export_data")
            .with_param("data", "rows")
            .with_param("filename", filename)
            .with_param("format", format)
    };
    let flow = flow()
        .with_variable("rows", rows)
        .with_step(export("json", "out/rows.json", "json"))
        .with_step(export("yaml", "out/rows.yaml", "yaml"))
        .with_step(export("csv", "out/rows.csv", "csv"));

    let device = Arc::new(FakeDevice::default());
    engine(device, None, dir.path()).run(&flow).await.unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/rows.json")).unwrap()).unwrap();
    assert_eq!(json[0]["name"], "tea");
    assert_eq!(json[0]["price"], 3.0);

    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(dir.path().join("out/rows.yaml")).unwrap()).unwrap();
    assert_eq!(yaml[1]["name"].as_str(), Some("milk, oat"));

    let csv = std::fs::read_to_string(dir.path().join("out/rows.csv")).unwrap();
    assert_eq!(csv, "name,price\r\ntea,3\r\n\"milk, oat\",\r\n");
}

#[tokio::test]
async fn test_export_data_rejects_unknown_format() {
    let dir = tempfile::tempdir().unwrap();
    let flow = flow().with_step(
        StepDefinition::new("export", "export_data")
            .with_param("data", "rows")
            .with_param("filename", "rows.xml")
            .with_param("format", "xml"),
    );

    let err = engine(Arc::new(FakeDevice::default()), None, dir.path())
        .run(&flow)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::ActionExecution { source: ActionError::InvalidParam { .. }, .. }
    ));
    assert!(!dir.path().join("rows.xml").exists());
}

#[tokio::test]
async fn test_ui_actions_drive_device() {
    let flow = flow()
        .with_variable("buy_button", "[100,200][300,400]")
        .with_step(StepDefinition::new("open", "start_app").with_param("package", "com.example.store"))
        .with_step(
            StepDefinition::new("tap", "click_region")
                .with_param("region", list(vec![0.into(), 0.into(), 100.into(), 50.into()])),
        )
        .with_step(StepDefinition::new("buy", "click_region").with_param("region", "${buy_button}"))
        .with_step(StepDefinition::new("type", "input_text").with_param("text", "iced latte"))
        .with_step(
            StepDefinition::new("fling", "swipe")
                .with_param("start_x", 10)
                .with_param("start_y", 20)
                .with_param("end_x", 30)
                .with_param("end_y", 40),
        )
        .with_step(
            StepDefinition::new("next", "scroll")
                .with_param("direction", "up")
                .with_param("distance", 600),
        )
        .with_step(StepDefinition::new("back", "press_back"))
        .with_step(StepDefinition::new("close", "stop_app").with_param("package", "com.example.store"));

    let (_, device) = run(flow).await;

    assert_eq!(
        device.calls(),
        vec![
            "start com.example.store",
            "click 50 25",
            "click 200 300",
            "text iced latte",
            "swipe 10 20 30 40 500",
            "swipe 540 1260 540 660 500",
            "back",
            "stop com.example.store",
        ]
    );
}

#[tokio::test]
async fn test_scroll_rejects_unknown_direction() {
    let dir = tempfile::tempdir().unwrap();
    let flow = flow().with_step(
        StepDefinition::new("sideways", "scroll")
            .with_param("direction", "left")
            .with_param("distance", 100),
    );

    let err = engine(Arc::new(FakeDevice::default()), None, dir.path())
        .run(&flow)
        .await
        .unwrap_err();

    assert_eq!(err.step_name(), Some("sideways"));
}

#[tokio::test]
async fn test_ocr_actions() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(FakeDevice::default());
    let recognizer = Arc::new(FakeRecognizer::new(vec![
        text("Total: 42", Region::new(10, 500, 200, 540)),
        text("Order", Region::new(10, 100, 200, 140)),
    ]));
    let flow = flow()
        .with_step(StepDefinition::new("has_order", "check_text_exists").with_param("text", "Order"))
        .with_step(StepDefinition::new("has_refund", "check_text_exists").with_param("text", "Refund"))
        .with_step(
            StepDefinition::new("read", "get_text_from_region")
                .with_param("region", "[0, 0, 1080, 1920]")
                .with_param("save_to", "summary"),
        );

    let report = engine(device, Some(recognizer.clone()), dir.path()).run(&flow).await.unwrap();

    assert_eq!(report.results["has_order"], Value::Bool(true));
    assert_eq!(report.results["has_refund"], Value::Bool(false));
    assert_eq!(report.results["read"], Value::from("Order Total: 42"));
    assert_eq!(report.variables["summary"], Value::from("Order Total: 42"));
    assert_eq!(recognizer.regions.lock()[2], Some(Region::new(0, 0, 1080, 1920)));
}

#[tokio::test]
async fn test_wait_and_click_ocr_text_polls_until_found() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(FakeDevice::default());
    let recognizer = Arc::new(FakeRecognizer::new(vec![text("Buy now", Region::new(100, 200, 300, 400))]).delayed(2));
    let flow = flow().with_step(
        StepDefinition::new("buy", "wait_and_click_ocr_text")
            .with_param("text", "Buy")
            .with_param("timeout", 5)
            .with_param("check_interval", 0.01),
    );

    let report = engine(device.clone(), Some(recognizer.clone()), dir.path())
        .run(&flow)
        .await
        .unwrap();

    assert_eq!(report.results["buy"], Value::Bool(true));
    assert_eq!(device.calls(), vec!["click 200 300"]);
    assert_eq!(recognizer.reads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_wait_and_click_ocr_text_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(FakeDevice::default());
    let recognizer = Arc::new(FakeRecognizer::new(Vec::new()));
    let flow = flow().with_step(
        StepDefinition::new("buy", "wait_and_click_ocr_text")
            .with_param("text", "Buy")
            .with_param("timeout", 0.05)
            .with_param("check_interval", 0.01),
    );

    let report = engine(device.clone(), Some(recognizer), dir.path()).run(&flow).await.unwrap();

    assert_eq!(report.results["buy"], Value::Bool(false));
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn test_ocr_action_without_engine_fails_step() {
    let dir = tempfile::tempdir().unwrap();
    let flow = flow().with_step(StepDefinition::new("look", "check_text_exists").with_param("text", "Order"));

    let err = engine(Arc::new(FakeDevice::default()), None, dir.path())
        .run(&flow)
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Configuration(_)));
}

#[tokio::test]
async fn test_sleep_and_log() {
    let flow = flow()
        .with_variable("who", "alice")
        .with_step(StepDefinition::new("nap", "sleep").with_param("seconds", 0.01))
        .with_step(StepDefinition::new("hello", "log").with_param("message", "hi ${who}"));

    let (report, _) = run(flow).await;

    assert_eq!(report.results["nap"], Value::Bool(true));
    assert_eq!(report.results["hello"], Value::from("hi alice"));
}

#[tokio::test]
async fn test_sleep_rejects_negative_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let flow = flow().with_step(StepDefinition::new("nap", "sleep").with_param("seconds", -1));

    let err = engine(Arc::new(FakeDevice::default()), None, dir.path())
        .run(&flow)
        .await
        .unwrap_err();

    assert_eq!(err.step_name(), Some("nap"));
}

#[tokio::test]
async fn test_out_of_range_durations_fail_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let recognizer = Arc::new(FakeRecognizer::new(Vec::new()));
    let steps = [
        StepDefinition::new("nap", "sleep").with_param("seconds", 1e20),
        StepDefinition::new("nap", "sleep").with_param("seconds", f64::INFINITY),
        StepDefinition::new("buy", "wait_and_click_ocr_text")
            .with_param("text", "Buy")
            .with_param("timeout", f64::INFINITY),
        StepDefinition::new("buy", "wait_and_click_ocr_text")
            .with_param("text", "Buy")
            .with_param("check_interval", 1e300),
    ];

    for step in steps {
        let name = step.name.clone();
        let err = engine(Arc::new(FakeDevice::default()), Some(recognizer.clone()), dir.path())
            .run(&flow().with_step(step))
            .await
            .unwrap_err();

        assert_eq!(err.step_name(), Some(name.as_str()));
        assert!(matches!(
            err,
            FlowError::ActionExecution {
                source: ActionError::InvalidParam { .. },
                ..
            }
        ));
    }
}

#[test]
fn test_register_all_lists_every_action() {
    let registry = registry();

    assert_eq!(
        registry.list_action_types(),
        vec![
            "append_to_list",
            "check_text_exists",
            "click_region",
            "export_data",
            "get_text_from_region",
            "get_variable",
            "input_text",
            "log",
            "press_back",
            "scroll",
            "set_variable",
            "sleep",
            "start_app",
            "stop_app",
            "swipe",
            "wait_and_click_ocr_text",
        ]
    );
    let metadata = registry.get_metadata("export_data").unwrap();
    assert_eq!(metadata.category, "data");
    assert!(metadata.params.iter().any(|p| p.name == "filename" && p.required));
}
