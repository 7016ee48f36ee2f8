//! Lifecycle state machine for a pipeline definition.
//!
//! ```text
//! NEW ──reload──> LOADING ──passed──> AVAILABLE ──reload──> LOADING ...
//!                    │
//!                    ├──failed──────> VALIDATION_FAILED ──reload──> LOADING
//!                    └──precondition> LOADING_PRECONDITION_FAILED
//!
//! any state ──retire──> RETIRED (terminal)
//! ```
//!
//! External callers may only trust the definition's structure in
//! `AVAILABLE` (and observe `RETIRED` as a terminal answer); every other
//! state means the structure is not trustworthy yet.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStateCode {
    New,
    Loading,
    Available,
    ValidationFailed,
    LoadingPreconditionFailed,
    Retired,
}

impl fmt::Display for PipelineStateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStateCode::New => "NEW",
            PipelineStateCode::Loading => "LOADING",
            PipelineStateCode::Available => "AVAILABLE",
            PipelineStateCode::ValidationFailed => "VALIDATION_FAILED",
            PipelineStateCode::LoadingPreconditionFailed => "LOADING_PRECONDITION_FAILED",
            PipelineStateCode::Retired => "RETIRED",
        };
        f.write_str(s)
    }
}

/// Events driving state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Validation or re-validation is starting.
    ReloadTriggered,
    ValidationPassed,
    ValidationFailed,
    /// Configuration could not even be read or parsed.
    LoadingPreconditionFailed,
    Retired,
}

/// Event-driven status of one named pipeline definition.
///
/// Transitions only happen through [`handle`](Self::handle); events illegal
/// in the current state are logged and ignored, except retirement which is
/// accepted from any state.
#[derive(Debug)]
pub struct PipelineDefinitionStatus {
    name: String,
    state: PipelineStateCode,
}

impl PipelineDefinitionStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PipelineStateCode::New,
        }
    }

    pub fn state_code(&self) -> PipelineStateCode {
        self.state
    }

    pub fn handle(&mut self, event: PipelineEvent) {
        use PipelineEvent as E;
        use PipelineStateCode as S;

        let next = match (self.state, event) {
            (_, E::Retired) => S::Retired,
            (S::Retired, _) => {
                warn!(
                    pipeline = %self.name,
                    event = ?event,
                    "ignoring lifecycle event on retired pipeline"
                );
                return;
            }
            (S::New | S::Available | S::ValidationFailed | S::LoadingPreconditionFailed, E::ReloadTriggered) => {
                S::Loading
            }
            (S::Loading, E::ValidationPassed) => S::Available,
            (S::Loading, E::ValidationFailed) => S::ValidationFailed,
            (S::Loading, E::LoadingPreconditionFailed) => S::LoadingPreconditionFailed,
            (state, event) => {
                warn!(
                    pipeline = %self.name,
                    state = %state,
                    event = ?event,
                    "ignoring illegal lifecycle event"
                );
                return;
            }
        };
        debug!(
            pipeline = %self.name,
            from = %self.state,
            to = %next,
            "pipeline state transition"
        );
        self.state = next;
    }

    pub fn is_available(&self) -> bool {
        self.state == PipelineStateCode::Available
    }

    pub fn is_retired(&self) -> bool {
        self.state == PipelineStateCode::Retired
    }

    /// States in which waiting for the definition to load cannot succeed
    /// without an intervening reload.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.state,
            PipelineStateCode::ValidationFailed
                | PipelineStateCode::LoadingPreconditionFailed
                | PipelineStateCode::Retired
        )
    }
}
