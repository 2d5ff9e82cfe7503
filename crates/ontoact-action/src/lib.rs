//! Action-execution scheduler.
//!
//! Resolves the objects an action type applies to, records a durable
//! execution, and runs the action against every object in a detached
//! background worker that dispatches to tool-box or MCP backends.

pub mod binder;
pub mod catalog;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod types;

pub use binder::build_execution_params;
pub use catalog::{ActionTypeCatalog, CatalogEntry, InMemoryCatalog};
pub use client::{HttpMcpProxyClient, HttpToolBoxClient, McpProxyClient, ToolBoxClient};
pub use dispatch::{Dispatcher, ExecutionContext, McpRequest, ToolRequest};
pub use error::{BindError, DispatchError, SchedulerError, StoreError};
pub use executor::BatchExecutor;
pub use hooks::{DuplicateCheck, PermissionCheck};
pub use scheduler::ActionScheduler;
pub use selector::{build_instance_identities_condition, effective_condition, ObjectSelector};
pub use store::{ExecutionLogStore, InMemoryExecutionStore, SqliteExecutionStore};
pub use types::{ActionExecutionRequest, ActionExecutionResponse};
