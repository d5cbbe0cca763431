//! Screen text actions backed by the OCR engine

use async_trait::async_trait;
use rpacore::{Action, ActionContext, ActionError, DeviceDriver, Params, Region, TextMatch, TextRecognizer, Value};
use rparuntime::{ActionFactory, ActionMetadata, ActionResources, ParamDefinition};
use std::sync::Arc;
use tokio::time::{sleep, Instant};

const DEFAULT_WAIT_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_CHECK_INTERVAL_SECS: f64 = 2.0;

/// Screenshot plus OCR against the bound device
#[derive(Clone)]
pub struct ScreenReader {
    device: Arc<dyn DeviceDriver>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl ScreenReader {
    async fn read(&self, region: Option<Region>) -> Result<Vec<TextMatch>, ActionError> {
        let png = self.device.screenshot().await?;
        self.recognizer.recognize(&png, region).await
    }
}

/// `region`, or the older `screenshot_region` spelling
fn optional_region(params: &Params) -> Result<Option<Region>, ActionError> {
    for field in ["region", "screenshot_region"] {
        if let Some(value) = params.get(field) {
            return Region::from_value(field, value).map(Some);
        }
    }
    Ok(None)
}

fn find<'a>(matches: &'a [TextMatch], text: &str) -> Option<&'a TextMatch> {
    matches.iter().find(|m| m.text.contains(text))
}

pub struct CheckTextExistsAction {
    reader: ScreenReader,
}

#[async_trait]
impl Action for CheckTextExistsAction {
    fn action_type(&self) -> &str {
        "check_text_exists"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let text = ctx.params.require("text")?.to_string();
        let region = optional_region(&ctx.params)?;

        let matches = self.reader.read(region).await?;
        let found = find(&matches, &text).is_some();
        ctx.events.info(format!("Text '{}' {}", text, if found { "found" } else { "not found" }));
        Ok(Value::Bool(found))
    }
}

/// Read all text inside a region, optionally saving it to a variable
pub struct GetTextFromRegionAction {
    reader: ScreenReader,
}

#[async_trait]
impl Action for GetTextFromRegionAction {
    fn action_type(&self) -> &str {
        "get_text_from_region"
    }

    async fn execute(&self, mut ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let region = Region::from_value("region", ctx.params.require("region")?)?;

        let mut matches = self.reader.read(Some(region)).await?;
        // reading order: top to bottom, then left to right
        matches.sort_by_key(|m| (m.bounds.y1, m.bounds.x1));
        let text: String = matches.iter().map(|m| m.text.as_str()).collect::<Vec<_>>().join(" ");

        if let Some(name) = ctx.params.get_str("save_to") {
            ctx.variables.set(name.to_string(), text.clone());
        }
        Ok(Value::String(text))
    }
}

/// Poll the screen until the text shows up, then tap it
pub struct WaitAndClickOcrTextAction {
    reader: ScreenReader,
}

#[async_trait]
impl Action for WaitAndClickOcrTextAction {
    fn action_type(&self) -> &str {
        "wait_and_click_ocr_text"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value, ActionError> {
        let text = ctx.params.require("text")?.to_string();
        let timeout = ctx.params.get_secs_or("timeout", DEFAULT_WAIT_TIMEOUT_SECS)?;
        let interval = ctx.params.get_secs_or("check_interval", DEFAULT_CHECK_INTERVAL_SECS)?;
        let region = optional_region(&ctx.params)?;

        ctx.events.info(format!("Waiting for '{}' (timeout {:?})", text, timeout));
        // None: the timeout lies beyond what the clock can represent
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let matches = self.reader.read(region).await?;
            if let Some(hit) = find(&matches, &text) {
                let (x, y) = hit.bounds.center();
                tracing::debug!("Found '{}' at ({}, {})", text, x, y);
                match self.reader.device.click(x, y).await {
                    Ok(()) => {
                        ctx.events.info(format!("Clicked '{}' at ({}, {})", text, x, y));
                        return Ok(Value::Bool(true));
                    }
                    Err(e) => ctx.events.warn(format!("Click on '{}' failed, retrying: {}", text, e)),
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            sleep(pause).await;
        }

        ctx.events.warn(format!("Timed out waiting for '{}'", text));
        Ok(Value::Bool(false))
    }
}

/// Factory for actions that need the OCR engine as well as the device
pub struct OcrActionFactory {
    action_type: &'static str,
    description: &'static str,
    params: fn() -> Vec<ParamDefinition>,
    build: fn(ScreenReader) -> Arc<dyn Action>,
}

impl ActionFactory for OcrActionFactory {
    fn create(&self, resources: &ActionResources) -> Result<Arc<dyn Action>, ActionError> {
        let recognizer = resources.require_recognizer(self.action_type)?.clone();
        Ok((self.build)(ScreenReader {
            device: resources.device.clone(),
            recognizer,
        }))
    }

    fn action_type(&self) -> &str {
        self.action_type
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: self.description.to_string(),
            category: "ocr".to_string(),
            params: (self.params)(),
        }
    }
}

pub fn factories() -> Vec<OcrActionFactory> {
    vec![
        OcrActionFactory {
            action_type: "check_text_exists",
            description: "Check whether text is visible on screen",
            params: || {
                vec![
                    ParamDefinition::required("text", "Text to look for"),
                    ParamDefinition::optional("region", "Limit the search to [x1, y1, x2, y2]"),
                ]
            },
            build: |reader| Arc::new(CheckTextExistsAction { reader }),
        },
        OcrActionFactory {
            action_type: "get_text_from_region",
            description: "Read the text inside a screen region",
            params: || {
                vec![
                    ParamDefinition::required("region", "[x1, y1, x2, y2]"),
                    ParamDefinition::optional("save_to", "Variable to store the text in"),
                ]
            },
            build: |reader| Arc::new(GetTextFromRegionAction { reader }),
        },
        OcrActionFactory {
            action_type: "wait_and_click_ocr_text",
            description: "Wait for text to appear on screen and tap it",
            params: || {
                vec![
                    ParamDefinition::required("text", "Text to tap"),
                    ParamDefinition::optional("timeout", "Seconds, default 30"),
                    ParamDefinition::optional("check_interval", "Seconds between checks, default 2"),
                    ParamDefinition::optional("region", "Limit the search to [x1, y1, x2, y2]"),
                ]
            },
            build: |reader| Arc::new(WaitAndClickOcrTextAction { reader }),
        },
    ]
}
