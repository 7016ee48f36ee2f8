//! Error types for pipeline definition lifecycle and request admission.

use std::time::Duration;

use thiserror::Error;

use crate::dag::GatherError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The definition is in a failed state; waiting longer will not help
    /// until a reload succeeds.
    #[error("pipeline definition {name} is not available: validation failed")]
    ValidationFailedState { name: String },

    #[error("pipeline definition {name} is retired")]
    Retired { name: String },

    /// Retryable: the definition may still be loading.
    #[error("timed out after {timeout:?} waiting for pipeline definition {name} to load")]
    WaitForLoadedTimeout { name: String, timeout: Duration },

    #[error("graph configuration file {path} is missing or unreadable")]
    ConfigFileMissing { path: String },

    #[error("graph configuration for {name} failed validation: {reason}")]
    Validation { name: String, reason: String },

    #[error("pipeline definition {name} not found")]
    DefinitionNotFound { name: String },

    #[error("pipeline definition {name} is already registered")]
    AlreadyRegistered { name: String },

    /// A request tensor disagrees with the declared input layout. Reported
    /// to the client, never coerced.
    #[error(
        "request input {input} does not match declared layout: expected {expected}, got {actual}"
    )]
    RequestInputMismatch {
        input: String,
        expected: String,
        actual: String,
    },

    #[error("request is missing declared input {input}")]
    RequestInputMissing { input: String },

    /// Structural defect detected during shard consolidation; fails the
    /// request, not the definition.
    #[error("pipeline inconsistency: {0}")]
    Inconsistent(#[from] GatherError),

    /// Failure reported by the external graph runtime.
    #[error("graph runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
