//! Error types for scatter/gather execution.

use thiserror::Error;

use crate::tensor::{Precision, TensorError};

/// Errors raised while gating and consolidating node inputs.
///
/// Every variant here is a structural/wiring defect of the graph: none of
/// them is retryable, and none of them invalidates the pipeline definition
/// the graph was built from. They surface as a pipeline-inconsistency
/// failure for the request that triggered execution.
#[derive(Debug, Error)]
pub enum GatherError {
    /// The graph engine delivered the same shard slot twice.
    #[error("shard {shard_id} for input {input} was already set")]
    DuplicateShard { input: String, shard_id: usize },

    /// A non-sharded input was delivered twice.
    #[error("input {input} was already set")]
    DuplicateInput { input: String },

    /// A dense, 0-based shard id space is assumed; shard 0 defines the
    /// reference layout for its input.
    #[error("input {input} is missing reference shard 0")]
    MissingReferenceShard { input: String },

    /// A shard disagrees with shard 0's layout.
    #[error(
        "inconsistent shards for input {input}: reference is {expected_precision} {expected_shape}, \
         shard {shard_id} is {actual_precision} {actual_shape}"
    )]
    ShardInconsistency {
        input: String,
        shard_id: usize,
        expected_precision: Precision,
        expected_shape: String,
        actual_precision: Precision,
        actual_shape: String,
    },

    #[error("shard id {shard_id} out of range for {total_shards} shards")]
    ShardIdOutOfRange {
        shard_id: usize,
        total_shards: usize,
    },

    #[error("input name must not be empty")]
    EmptyInputName,

    /// Collapse sizes must be a non-empty sequence of positive fan-outs.
    #[error("invalid collapsed session sizes {sizes:?}: every level must be positive")]
    InvalidCollapseSizes { sizes: Vec<usize> },

    /// A dependency-gated node must expect at least one dependency.
    #[error("node input handler constructed with zero expected dependencies")]
    NoDependencies,

    /// More `notify_finished_dependency` calls arrived than dependencies.
    #[error("dependency counter decremented past zero")]
    CounterUnderflow,

    /// Allocating or shaping the consolidated tensor failed.
    #[error("failed to build consolidated tensor for input {input}")]
    Consolidation {
        input: String,
        #[source]
        source: TensorError,
    },
}

pub type Result<T> = std::result::Result<T, GatherError>;
