//! Core abstractions for the RPA flow engine
//!
//! This crate provides the flow document model, the value type that flows
//! through steps, variable scoping and template resolution, and the traits
//! that actions and device collaborators implement. It has no runtime
//! dependencies on the engine itself.

mod action;
mod condition;
pub mod device;
mod error;
pub mod events;
mod flow;
mod results;
pub mod template;
mod value;
mod variables;

pub use action::{Action, ActionContext, Params};
pub use condition::Condition;
pub use device::{DeviceDriver, DeviceProbe, Region, TextMatch, TextRecognizer};
pub use error::{ActionError, DeviceError, FlowError};
pub use events::*;
pub use flow::{parse_device_ids, DeviceSpec, FlowDefinition, StepDefinition};
pub use results::StepResultStore;
pub use value::Value;
pub use variables::VariableStore;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
