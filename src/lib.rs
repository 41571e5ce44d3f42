//! # Plugflow
//!
//! Plugflow executes plugin workflows: directed graphs of typed nodes that
//! run an external binary once per item of an iteration set (typically the
//! frames of a simulation trajectory), publish its outputs and export them.
//!
//! ## Core Features
//!
//! - **Plan, then fan out**: `plan_execution_strategy` finds the iteration set,
//!   `execute_workflow_job` runs the graph for one item
//! - **Per-item isolation**: a failing item is recorded in the outputs and never
//!   aborts its siblings
//! - **Self-healing worker pool**: bounded OS-thread workers with idle
//!   scale-down, crash replacement and crash-loop backoff
//! - **Status tracking**: TTL'd job records, live subscriptions and
//!   per-trajectory grouping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plugflow::{EngineBuilder, ExecutionRequest, Workflow, WorkflowModel};
//!
//! let engine = EngineBuilder::new().dump_source(dumps).build()?;
//! let model = WorkflowModel::from_json(json_str)?;
//! let request = ExecutionRequest::new(Arc::new(Workflow::try_from(&model)?));
//!
//! if let Some(plan) = engine.plan_execution_strategy(&request).await? {
//!     for (index, item) in plan.items.into_iter().enumerate() {
//!         let results = engine.execute_workflow_job(&request.for_item(index, item)).await?;
//!     }
//! }
//! ```

mod builder;
pub mod common;
mod config;
mod engine;
mod error;
pub mod exporter;
mod model;
pub mod pool;
pub mod queue;
mod runtime;
pub mod status;
pub mod store;
mod utils;
pub mod workflow;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use config::{Config, EngineConfig, PoolConfig, QueueConfig, StatusConfig};
pub use engine::{ExecutionOptions, ExecutionPlanResult, ExecutionRequest, ExposureExport, ExposureResult, WorkflowEngine, frame_of};
pub use error::PlugflowError;
pub use model::*;
pub use runtime::ExecutionContext;
pub use workflow::Workflow;

/// Result type alias for Plugflow operations.
pub type Result<T> = std::result::Result<T, PlugflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
