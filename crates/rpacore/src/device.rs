//! Device-side collaborators
//!
//! The engine never talks to a phone directly. Actions drive a
//! [`DeviceDriver`], OCR actions ask a [`TextRecognizer`], and the device
//! pool checks liveness through a [`DeviceProbe`].

use crate::{ActionError, DeviceError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Remote control of one claimed device
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Address or serial of the device this driver is bound to
    fn serial(&self) -> &str;

    async fn click(&self, x: i64, y: i64) -> Result<(), DeviceError>;

    async fn swipe(
        &self,
        start: (i64, i64),
        end: (i64, i64),
        duration_ms: u64,
    ) -> Result<(), DeviceError>;

    /// Screen size as (width, height)
    async fn window_size(&self) -> Result<(i64, i64), DeviceError>;

    async fn input_text(&self, text: &str) -> Result<(), DeviceError>;

    async fn press_back(&self) -> Result<(), DeviceError>;

    async fn app_start(&self, package: &str) -> Result<(), DeviceError>;

    async fn app_stop(&self, package: &str) -> Result<(), DeviceError>;

    /// PNG encoded screenshot
    async fn screenshot(&self) -> Result<Vec<u8>, DeviceError>;
}

/// Connectivity check used by the device pool
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn probe(&self, device_id: &str) -> Result<(), DeviceError>;
}

/// OCR engine
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in a PNG screenshot, optionally restricted to a region.
    /// Returned bounds are in screen coordinates.
    async fn recognize(&self, png: &[u8], region: Option<Region>) -> Result<Vec<TextMatch>, ActionError>;
}

/// A piece of recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub text: String,
    pub bounds: Region,
    pub confidence: f64,
}

/// Screen rectangle `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl Region {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (i64, i64) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    /// Accepts a 4-element list, a `"[x1, y1, x2, y2]"` string, or a
    /// uiautomator bounds string `"[x1,y1][x2,y2]"`.
    pub fn from_value(field: &str, value: &Value) -> Result<Self, ActionError> {
        match value {
            Value::Array(items) => Self::from_items(field, items),
            Value::String(s) => Self::parse(field, s),
            other => Err(ActionError::invalid(field, "region [x1, y1, x2, y2]", other.kind())),
        }
    }

    fn from_items(field: &str, items: &[Value]) -> Result<Self, ActionError> {
        let coords: Vec<i64> = items
            .iter()
            .map(|v| v.to_number().map(|n| n as i64))
            .collect::<Option<_>>()
            .ok_or_else(|| ActionError::invalid(field, "numeric coordinates", "non-numeric"))?;
        match coords.as_slice() {
            [x1, y1, x2, y2] => Ok(Self::new(*x1, *y1, *x2, *y2)),
            _ => Err(ActionError::invalid(
                field,
                "4 coordinates",
                format!("{} coordinates", coords.len()),
            )),
        }
    }

    fn parse(field: &str, s: &str) -> Result<Self, ActionError> {
        let trimmed = s.trim();
        if let Some(inner) = trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            if let Some((first, second)) = inner.split_once("][") {
                let a = parse_pair(first);
                let b = parse_pair(second);
                if let (Some((x1, y1)), Some((x2, y2))) = (a, b) {
                    return Ok(Self::new(x1, y1, x2, y2));
                }
            } else if let Ok(list) = serde_json::from_str::<Vec<f64>>(trimmed) {
                let items: Vec<Value> = list.into_iter().map(Value::Number).collect();
                return Self::from_items(field, &items);
            }
        }
        Err(ActionError::invalid(field, "region [x1, y1, x2, y2]", format!("'{}'", s)))
    }
}

fn parse_pair(s: &str) -> Option<(i64, i64)> {
    let (x, y) = s.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}
