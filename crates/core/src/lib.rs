//! Orchestration core of a graph-based model server.
//!
//! Two subsystems do the heavy lifting:
//!
//! - [`dag`] - scatter/gather shard consolidation: collecting tensor
//!   fragments from demultiplied graph branches and merging them into one
//!   tensor, gated by a dependency counter that fires exactly once.
//! - [`pipeline`] - the lifecycle of named graph definitions: validation,
//!   hot reload, retirement, and in-flight-request tracking so that a
//!   reconfiguration never invalidates structure still in use.
//!
//! Inference itself, node scheduling and the wire protocol live in
//! external collaborators behind the [`pipeline::GraphRuntime`] boundary.

pub mod dag;
pub mod pipeline;
pub mod tensor;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
