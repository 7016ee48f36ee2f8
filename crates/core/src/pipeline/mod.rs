//! Pipeline definition lifecycle management.
//!
//! A pipeline definition is a named, loaded graph specification shared by
//! every request that targets it. This module governs its life:
//!
//! - [`PipelineDefinitionStatus`] - the lifecycle state machine
//! - [`PipelineDefinition`] - configuration, validation, reload, retirement
//! - [`UnloadGuard`] - scoped in-flight marker blocking unsafe retirement
//! - [`PipelineManager`] - name-keyed registry owning the [`GraphRuntime`]
//!   boundary to the external graph engine
//!
//! Requests admit themselves with
//! [`PipelineDefinition::wait_for_loaded`], which couples "observed
//! `AVAILABLE`" and "counted as in-flight" under one lock so no
//! reconfiguration can slip in between.

mod config;
mod definition;
mod error;
mod executor;
mod manager;
mod status;

pub use config::{stream_name, GraphConfig, GraphSpec, NodeSpec};
pub use definition::{
    InflightCounter, PipelineDefinition, UnloadGuard, WAIT_FOR_LOADED_DEFAULT_TIMEOUT,
};
pub use error::{PipelineError, Result};
pub use executor::PipelineExecutor;
pub use manager::{GraphPorts, GraphRuntime, PipelineManager};
pub use status::{PipelineDefinitionStatus, PipelineEvent, PipelineStateCode};
