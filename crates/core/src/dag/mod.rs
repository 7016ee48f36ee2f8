//! Scatter/gather plumbing for demultiplied graph regions.
//!
//! When the graph engine fans a value out across parallel sub-executions,
//! each branch produces one shard. This module reassembles those shards:
//!
//! - [`CollapseDetails`] - the fan-out sizes, one per demultiplication level
//! - [`NodeInputHandler`] - dependency gate releasing a node's inputs once
//!   every upstream dependency has finished
//! - [`GatherInputHandler`] - gather specialization that collects shards and
//!   merges them into one tensor on the final dependency
//!
//! Consolidation is gated by an atomically decremented counter, so exactly
//! one producer performs the merge regardless of arrival order.

mod collapse;
mod error;
mod gather;
mod input_handler;

pub use collapse::CollapseDetails;
pub use error::{GatherError, Result};
pub use gather::GatherInputHandler;
pub use input_handler::{NodeInputHandler, Readiness};
