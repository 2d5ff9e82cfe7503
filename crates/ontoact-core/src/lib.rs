pub mod action;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod state_machine;
pub mod types;

pub use action::{ActionSource, ActionSourceType, ActionType, ParamSource, Parameter, ValueFrom};
pub use config::{BackendConfig, ExecutionConfig, GeneralConfig, OntoactConfig};
pub use error::{OntoactError, Result};
pub use execution::{
    ActionExecution, ExecutionStatus, ExecutionUpdate, ObjectExecutionResult, ObjectStatus,
};
pub use types::*;
