//! Orchestration of rolling-window rollups
//!
//! Plans a [`QueryModel`](tumbler_sql::QueryModel) into derived entities,
//! submits their DDL in dependency order, waits for each persistent query to
//! stabilize, and registers the resulting entity descriptors.
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(executor, topics, OrchestratorConfig::default());
//! orchestrator.register_source(ticks_descriptor);
//! let results = orchestrator.initialize(&query).await?;
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
mod stabilize;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{ExecutionResult, Orchestrator, PersistentQueryExecution, PlannedEntity};
pub use registry::EntityRegistry;
