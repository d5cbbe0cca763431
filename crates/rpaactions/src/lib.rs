//! Standard action library
//!
//! Collection of built-in actions for driving Android devices, plus the
//! adb-backed device driver and probe.

mod adb;
mod data;
mod debug;
mod ocr;
mod time;
mod ui;

pub use adb::{Adb, AdbDriver, AdbDriverFactory, AdbProbe};
pub use data::{AppendToListAction, ExportDataAction, GetVariableAction, SetVariableAction};
pub use debug::LogAction;
pub use ocr::{CheckTextExistsAction, GetTextFromRegionAction, OcrActionFactory, WaitAndClickOcrTextAction};
pub use time::SleepAction;
pub use ui::{
    ClickRegionAction, DeviceActionFactory, InputTextAction, PressBackAction, ScrollAction,
    StartAppAction, StopAppAction, SwipeAction,
};

use rparuntime::ActionRegistry;
use std::sync::Arc;

/// Register all standard actions with a registry
pub fn register_all(registry: &mut ActionRegistry) {
    registry.register(Arc::new(data::SetVariableActionFactory));
    registry.register(Arc::new(data::GetVariableActionFactory));
    registry.register(Arc::new(data::AppendToListActionFactory));
    registry.register(Arc::new(data::ExportDataActionFactory));
    registry.register(Arc::new(debug::LogActionFactory));
    registry.register(Arc::new(time::SleepActionFactory));
    for factory in ui::factories() {
        registry.register(Arc::new(factory));
    }
    for factory in ocr::factories() {
        registry.register(Arc::new(factory));
    }
}
