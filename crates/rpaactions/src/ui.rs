//! Touch and app-control actions driven through the bound device

use async_trait::async_trait;
use rpacore::{Action, ActionContext, ActionError, DeviceDriver, Region, Value};
use rparuntime::{ActionFactory, ActionMetadata, ActionResources, ParamDefinition};
use std::sync::Arc;

/// Keeps scroll gestures away from the system bars
const SCROLL_EDGE_MARGIN: i64 = 100;

/// Factory for actions that only need the device driver
pub struct DeviceActionFactory {
    action_type: &'static str,
    description: &'static str,
    params: fn() -> Vec<ParamDefinition>,
    build: fn(Arc<dyn DeviceDriver>) -> Arc<dyn Action>,
}

impl ActionFactory for DeviceActionFactory {
    fn create(&self, resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        Ok((self.build)(resources.device.clone()))
    }

    fn action_type(&self) -> &str {
        self.action_type
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: self.description.to_string(),
            category: "ui".to_string(),
            params: (self.params)(),
        }
    }
}

/// Tap the center of a region
pub struct ClickRegionAction {
    device: Arc<dyn DeviceDriver>,
}

#[async_trait]
impl Action for ClickRegionAction {
    fn action_type(&self) -> &str {
        "click_region"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let region = Region::from_value("region", ctx.params.require("region")?)?;
        let (x, y) = region.center();
        ctx.events.info(format!("Clicking ({}, {})", x, y));
        self.device.click(x, y).await?;
        Ok(Value::Bool(true))
    }
}

pub struct SwipeAction {
    device: Arc<dyn DeviceDriver>,
}

#[async_trait]
impl Action for SwipeAction {
    fn action_type(&self) -> &str {
        "swipe"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let start = (ctx.params.require_i64("start_x")?, ctx.params.require_i64("start_y")?);
        let end = (ctx.params.require_i64("end_x")?, ctx.params.require_i64("end_y")?);
        let duration_ms = ctx.params.get_f64_or("duration", 500.0)?.max(0.0) as u64;

        self.device.swipe(start, end, duration_ms).await?;
        Ok(Value::Bool(true))
    }
}

/// Vertical swipe of `distance` pixels centered on the screen
pub struct ScrollAction {
    device: Arc<dyn DeviceDriver>,
}

impl ScrollAction {
    fn gesture(direction: &str, distance: i64, size: (i64, i64)) -> Result<((i64, i64), (i64, i64)), ActionError> {
        let (width, height) = size;
        let x = width / 2;
        let center = height / 2;
        let half = distance / 2;
        let top = (center - half).max(SCROLL_EDGE_MARGIN);
        let bottom = (center + half).min(height - SCROLL_EDGE_MARGIN);

        match direction {
            "up" => Ok(((x, bottom), (x, top))),
            "down" => Ok(((x, top), (x, bottom))),
            other => Err(ActionError::invalid("direction", "up or down", other)),
        }
    }
}

#[async_trait]
impl Action for ScrollAction {
    fn action_type(&self) -> &str {
        "scroll"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let direction = ctx.params.require_str("direction")?;
        let distance = ctx.params.require_i64("distance")?;
        // seconds, like the rest of the timing params
        let duration = ctx.params.get_f64_or("duration", 0.5)?.max(0.0);

        let size = self.device.window_size().await?;
        let (start, end) = Self::gesture(direction, distance, size)?;
        tracing::debug!("Scroll {}: {:?} -> {:?}", direction, start, end);

        self.device.swipe(start, end, (duration * 1000.0) as u64).await?;
        ctx.events.info(format!(
            "Scrolled {} by {} (actual {})",
            direction,
            distance,
            (end.1 - start.1).abs()
        ));
        Ok(Value::Bool(true))
    }
}

pub struct InputTextAction {
    device: Arc<dyn DeviceDriver>,
}

#[async_trait]
impl Action for InputTextAction {
    fn action_type(&self) -> &str {
        "input_text"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let text = ctx.params.require("text")?.to_string();
        self.device.input_text(&text).await?;
        Ok(Value::Bool(true))
    }
}

pub struct StartAppAction {
    device: Arc<dyn DeviceDriver>,
}

#[async_trait]
impl Action for StartAppAction {
    fn action_type(&self) -> &str {
        "start_app"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let package = ctx.params.require_str("package")?;
        ctx.events.info(format!("Starting {}", package));
        self.device.app_start(package).await?;
        Ok(Value::Bool(true))
    }
}

pub struct StopAppAction {
    device: Arc<dyn DeviceDriver>,
}

#[async_trait]
impl Action for StopAppAction {
    fn action_type(&self) -> &str {
        "stop_app"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let package = ctx.params.require_str("package")?;
        ctx.events.info(format!("Stopping {}", package));
        self.device.app_stop(package).await?;
        Ok(Value::Bool(true))
    }
}

pub struct PressBackAction {
    device: Arc<dyn DeviceDriver>,
}

#[async_trait]
impl Action for PressBackAction {
    fn action_type(&self) -> &str {
        "press_back"
    }

    async fn execute(&self, _ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        self.device.press_back().await?;
        Ok(Value::Bool(true))
    }
}

/// Factories for every device-only action
pub fn factories() -> Vec<DeviceActionFactory> {
    vec![
        DeviceActionFactory {
            action_type: "click_region",
            description: "Tap the center of a screen region",
            params: || vec![ParamDefinition::required("region", "[x1, y1, x2, y2] or \"[x1,y1][x2,y2]\"")],
            build: |device| Arc::new(ClickRegionAction { device }),
        },
        DeviceActionFactory {
            action_type: "swipe",
            description: "Swipe between two points",
            params: || {
                vec![
                    ParamDefinition::required("start_x", "Start x"),
                    ParamDefinition::required("start_y", "Start y"),
                    ParamDefinition::required("end_x", "End x"),
                    ParamDefinition::required("end_y", "End y"),
                    ParamDefinition::optional("duration", "Milliseconds, default 500"),
                ]
            },
            build: |device| Arc::new(SwipeAction { device }),
        },
        DeviceActionFactory {
            action_type: "scroll",
            description: "Scroll the screen up or down",
            params: || {
                vec![
                    ParamDefinition::required("direction", "up or down"),
                    ParamDefinition::required("distance", "Pixels"),
                    ParamDefinition::optional("duration", "Seconds, default 0.5"),
                ]
            },
            build: |device| Arc::new(ScrollAction { device }),
        },
        DeviceActionFactory {
            action_type: "input_text",
            description: "Type text into the focused field",
            params: || vec![ParamDefinition::required("text", "Text to type")],
            build: |device| Arc::new(InputTextAction { device }),
        },
        DeviceActionFactory {
            action_type: "start_app",
            description: "Launch an app by package name",
            params: || vec![ParamDefinition::required("package", "Android package name")],
            build: |device| Arc::new(StartAppAction { device }),
        },
        DeviceActionFactory {
            action_type: "stop_app",
            description: "Force-stop an app by package name",
            params: || vec![ParamDefinition::required("package", "Android package name")],
            build: |device| Arc::new(StopAppAction { device }),
        },
        DeviceActionFactory {
            action_type: "press_back",
            description: "Press the back key",
            params: Vec::new,
            build: |device| Arc::new(PressBackAction { device }),
        },
    ]
}
