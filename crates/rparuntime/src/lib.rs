//! Flow execution runtime
//!
//! This crate provides the engine that interprets flows step by step, the
//! action registry, the shared device pool and the failure notifier.

mod config;
mod engine;
mod notify;
mod pool;
mod registry;
mod runtime;
mod source;

pub use config::RuntimeConfig;
pub use engine::{
    find_unknown_actions, ControlFlow, EngineState, ExecutionReport, FlowEngine, BREAK_ACTION,
    CONTINUE_ACTION, CONTROL_ACTIONS, FOR_EACH_ACTION, LOOP_ACTION,
};
pub use notify::{LogNotifier, NotificationSink, StepFailure, WebhookNotifier};
pub use pool::{
    DevicePool, DeviceRecord, DeviceSnapshot, DeviceStatus, MaintenanceHandle, PoolConfig,
    ReconcileReport,
};
pub use registry::{ActionFactory, ActionMetadata, ActionRegistry, ActionResources, ParamDefinition};
pub use runtime::{DriverFactory, FlowRuntime, RunOptions, RunOutcome};
pub use source::{DeviceSource, FlowDirectorySource, StaticDeviceSource};
