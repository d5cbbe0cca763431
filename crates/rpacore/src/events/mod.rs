// crates/rpacore/src/events/mod.rs

mod base;

pub use base::{ActionEvent, EventBus, ExecutionEvent, ExecutionId, StepEmitter};
