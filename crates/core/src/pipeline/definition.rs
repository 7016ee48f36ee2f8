//! One named, loaded pipeline definition and its lifecycle operations.
//!
//! A definition owns the parsed graph structure and its resolved I/O
//! descriptors. Validation, reload and retirement are exclusive writers;
//! concurrent requests read structure snapshots while holding an
//! [`UnloadGuard`], which is what makes retirement safe to sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::config::{stream_name, GraphConfig, GraphSpec};
use super::error::{PipelineError, Result};
use super::executor::PipelineExecutor;
use super::manager::PipelineManager;
use super::status::{PipelineDefinitionStatus, PipelineEvent, PipelineStateCode};
use crate::tensor::TensorMap;

/// Default budget for [`PipelineDefinition::wait_for_loaded`].
pub const WAIT_FOR_LOADED_DEFAULT_TIMEOUT: Duration = Duration::from_micros(500_000);

/// Count of requests currently using a definition's structure.
///
/// This is the narrow capability unload guards hold: increment and
/// decrement only, no access to the rest of the definition. It is not
/// covered by the metadata lock, so guard churn never contends with
/// long-held structural reads.
#[derive(Debug, Default)]
pub struct InflightCounter(AtomicU64);

impl InflightCounter {
    fn increase(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn decrease(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Scoped marker that a request is actively using a pipeline definition.
///
/// Construction increments the in-flight counter; the counter is released
/// on every exit path when the guard drops.
#[derive(Debug)]
pub struct UnloadGuard {
    counter: Arc<InflightCounter>,
}

impl UnloadGuard {
    fn new(counter: Arc<InflightCounter>) -> Self {
        counter.increase();
        Self { counter }
    }
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        self.counter.decrease();
    }
}

/// Structure snapshot swapped atomically on reload. In-flight requests keep
/// `Arc` clones of the previous snapshot, which reload never mutates.
#[derive(Debug, Clone, Default)]
pub(super) struct GraphMetadata {
    pub(super) spec: Arc<GraphSpec>,
    pub(super) inputs_info: Arc<TensorMap>,
    pub(super) outputs_info: Arc<TensorMap>,
}

/// Delivers exactly one terminal validation event on every exit path.
///
/// Created at the start of validation with a failure outcome; the happy
/// path upgrades it to `ValidationPassed`. Dropping the reporter publishes
/// the event and wakes all `wait_for_loaded` waiters, so waiters observe
/// the outcome even when validation returns early through `?`.
struct ValidationOutcomeReporter<'a> {
    definition: &'a PipelineDefinition,
    outcome: PipelineEvent,
}

impl<'a> ValidationOutcomeReporter<'a> {
    fn new(definition: &'a PipelineDefinition) -> Self {
        Self {
            definition,
            outcome: PipelineEvent::ValidationFailed,
        }
    }

    fn precondition_failed(&mut self) {
        self.outcome = PipelineEvent::LoadingPreconditionFailed;
    }

    fn passed(&mut self) {
        self.outcome = PipelineEvent::ValidationPassed;
    }
}

impl Drop for ValidationOutcomeReporter<'_> {
    fn drop(&mut self) {
        self.definition
            .status
            .lock()
            .unwrap()
            .handle(self.outcome);
        self.definition.loaded_notify.notify_all();
    }
}

/// One named, versioned pipeline definition.
pub struct PipelineDefinition {
    name: String,
    /// Retained so reload can re-read the graph source.
    config: RwLock<GraphConfig>,
    status: Mutex<PipelineDefinitionStatus>,
    loaded_notify: Condvar,
    metadata: RwLock<GraphMetadata>,
    inflight: Arc<InflightCounter>,
}

impl PipelineDefinition {
    /// Pipelines are not multi-versioned; any available definition reports
    /// this constant version.
    pub const VERSION: u64 = 1;

    pub fn new(config: GraphConfig) -> Self {
        let name = config.name.clone();
        Self {
            status: Mutex::new(PipelineDefinitionStatus::new(&name)),
            name,
            config: RwLock::new(config),
            loaded_notify: Condvar::new(),
            metadata: RwLock::new(GraphMetadata::default()),
            inflight: Arc::new(InflightCounter::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        Self::VERSION
    }

    pub fn state_code(&self) -> PipelineStateCode {
        self.status.lock().unwrap().state_code()
    }

    pub fn inputs_info(&self) -> Arc<TensorMap> {
        self.metadata.read().unwrap().inputs_info.clone()
    }

    pub fn outputs_info(&self) -> Arc<TensorMap> {
        self.metadata.read().unwrap().outputs_info.clone()
    }

    pub fn inflight_count(&self) -> u64 {
        self.inflight.count()
    }

    /// Parse and check the graph configuration, resolving I/O descriptors
    /// through a dry construction of the graph. Publishes exactly one
    /// terminal event; on success all `wait_for_loaded` waiters are woken
    /// into an `AVAILABLE` definition.
    pub fn validate(&self, manager: &PipelineManager) -> Result<()> {
        info!(pipeline = %self.name, "validation started");
        self.status
            .lock()
            .unwrap()
            .handle(PipelineEvent::ReloadTriggered);

        let mut reporter = ValidationOutcomeReporter::new(self);
        match self.build_metadata(manager, &mut reporter) {
            Ok(metadata) => {
                *self.metadata.write().unwrap() = metadata;
                reporter.passed();
                info!(pipeline = %self.name, "validation passed");
                Ok(())
            }
            Err(e) => {
                error!(pipeline = %self.name, error = %e, "validation failed");
                Err(e)
            }
        }
    }

    /// Swap in a new configuration and re-validate in place. Structure
    /// snapshots already handed to in-flight requests are untouched.
    pub fn reload(&self, manager: &PipelineManager, new_config: GraphConfig) -> Result<()> {
        if self.state_code() == PipelineStateCode::Retired {
            return Err(PipelineError::Retired {
                name: self.name.clone(),
            });
        }
        info!(pipeline = %self.name, "reload requested");
        *self.config.write().unwrap() = new_config;
        self.validate(manager)
    }

    /// Move to `RETIRED` and wake all waiters into a terminal error.
    ///
    /// Heavy resources must not be released until [`can_be_finalized`]
    /// reports true: requests still holding an unload guard continue
    /// against their structure snapshots.
    ///
    /// [`can_be_finalized`]: Self::can_be_finalized
    pub fn retire(&self, _manager: &PipelineManager) {
        info!(pipeline = %self.name, "retiring pipeline definition");
        self.status.lock().unwrap().handle(PipelineEvent::Retired);
        self.loaded_notify.notify_all();
    }

    /// Whether the definition's resources may be physically released.
    pub fn can_be_finalized(&self) -> bool {
        self.state_code() == PipelineStateCode::Retired && self.inflight.count() == 0
    }

    /// [`wait_for_loaded`](Self::wait_for_loaded_timeout) with the default
    /// 500 ms budget.
    pub fn wait_for_loaded(&self) -> Result<UnloadGuard> {
        self.wait_for_loaded_timeout(WAIT_FOR_LOADED_DEFAULT_TIMEOUT)
    }

    /// Block until the definition becomes `AVAILABLE` or the timeout
    /// elapses.
    ///
    /// On success the returned guard has already incremented the in-flight
    /// counter; the increment happens under the status lock, so no retire
    /// or reload can slip between observing `AVAILABLE` and being counted.
    /// Failed states return immediately without waiting out the timeout.
    pub fn wait_for_loaded_timeout(&self, timeout: Duration) -> Result<UnloadGuard> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock().unwrap();
        loop {
            match status.state_code() {
                PipelineStateCode::Available => {
                    return Ok(UnloadGuard::new(self.inflight.clone()));
                }
                PipelineStateCode::ValidationFailed
                | PipelineStateCode::LoadingPreconditionFailed => {
                    return Err(PipelineError::ValidationFailedState {
                        name: self.name.clone(),
                    });
                }
                PipelineStateCode::Retired => {
                    return Err(PipelineError::Retired {
                        name: self.name.clone(),
                    });
                }
                PipelineStateCode::New | PipelineStateCode::Loading => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PipelineError::WaitForLoadedTimeout {
                            name: self.name.clone(),
                            timeout,
                        });
                    }
                    let (reacquired, _timed_out) = self
                        .loaded_notify
                        .wait_timeout(status, deadline - now)
                        .unwrap();
                    // Re-check the state either way; a wakeup racing the
                    // deadline may still find the definition loaded.
                    status = reacquired;
                }
            }
        }
    }

    /// Admit a request: wait for the definition, capture a structure
    /// snapshot and tie both to an unload guard.
    pub fn executor(&self) -> Result<PipelineExecutor> {
        let guard = self.wait_for_loaded()?;
        let metadata = self.metadata.read().unwrap().clone();
        Ok(PipelineExecutor::new(
            self.name.clone(),
            Self::VERSION,
            metadata.spec,
            metadata.inputs_info,
            metadata.outputs_info,
            guard,
        ))
    }

    fn build_metadata(
        &self,
        manager: &PipelineManager,
        reporter: &mut ValidationOutcomeReporter<'_>,
    ) -> Result<GraphMetadata> {
        let config = self.config.read().unwrap().clone();
        let source = config.read_source().map_err(|e| {
            reporter.precondition_failed();
            e
        })?;
        let spec = GraphSpec::parse(&self.name, &source)?;
        spec.check_structure(&self.name)?;

        let ports = manager.runtime().build(&spec)?;
        let inputs_info = resolve_ports(&self.name, &spec.input_streams, &ports.inputs, "input")?;
        let outputs_info =
            resolve_ports(&self.name, &spec.output_streams, &ports.outputs, "output")?;

        Ok(GraphMetadata {
            spec: Arc::new(spec),
            inputs_info: Arc::new(inputs_info),
            outputs_info: Arc::new(outputs_info),
        })
    }
}

/// Every declared stream must have a descriptor resolved by the dry build.
fn resolve_ports(
    pipeline: &str,
    streams: &[String],
    ports: &TensorMap,
    kind: &str,
) -> Result<TensorMap> {
    let mut resolved = TensorMap::new();
    for stream in streams {
        let name = stream_name(stream);
        match ports.get(name) {
            Some(info) => {
                resolved.insert(name.to_string(), info.clone());
            }
            None => {
                return Err(PipelineError::Validation {
                    name: pipeline.to_string(),
                    reason: format!("dry construction resolved no {kind} descriptor for stream {stream}"),
                });
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::manager::PipelineManager;
    use crate::testing::{FailingGraphRuntime, StaticGraphRuntime, GRAPH_SOURCE};

    fn manager() -> PipelineManager {
        PipelineManager::new(Arc::new(StaticGraphRuntime::default()))
    }

    fn definition() -> PipelineDefinition {
        PipelineDefinition::new(GraphConfig::from_text("demo", GRAPH_SOURCE))
    }

    #[test]
    fn validate_publishes_metadata_and_becomes_available() {
        let manager = manager();
        let def = definition();
        def.validate(&manager).unwrap();
        assert_eq!(def.state_code(), PipelineStateCode::Available);
        assert!(def.inputs_info().contains_key("in"));
        assert!(def.outputs_info().contains_key("out"));
        assert_eq!(def.version(), 1);
    }

    #[test]
    fn failed_dry_build_lands_in_validation_failed() {
        let manager = PipelineManager::new(Arc::new(FailingGraphRuntime::new("graph broken")));
        let def = definition();
        assert!(def.validate(&manager).is_err());
        assert_eq!(def.state_code(), PipelineStateCode::ValidationFailed);
    }

    #[test]
    fn missing_config_file_is_a_precondition_failure() {
        let manager = manager();
        let def = PipelineDefinition::new(GraphConfig::from_path("demo", "/nonexistent/g.json"));
        assert!(matches!(
            def.validate(&manager),
            Err(PipelineError::ConfigFileMissing { .. })
        ));
        assert_eq!(
            def.state_code(),
            PipelineStateCode::LoadingPreconditionFailed
        );
    }

    #[test]
    fn unparsable_source_fails_validation() {
        let manager = manager();
        let def = PipelineDefinition::new(GraphConfig::from_text("demo", "not json"));
        assert!(def.validate(&manager).is_err());
        assert_eq!(def.state_code(), PipelineStateCode::ValidationFailed);
    }

    #[test]
    fn wait_for_loaded_counts_the_guard() {
        let manager = manager();
        let def = definition();
        def.validate(&manager).unwrap();

        let guard = def.wait_for_loaded().unwrap();
        assert_eq!(def.inflight_count(), 1);
        let second = def.wait_for_loaded().unwrap();
        assert_eq!(def.inflight_count(), 2);
        drop(guard);
        drop(second);
        assert_eq!(def.inflight_count(), 0);
    }

    #[test]
    fn wait_for_loaded_fails_fast_on_terminal_states() {
        let manager = PipelineManager::new(Arc::new(FailingGraphRuntime::new("nope")));
        let def = definition();
        let _ = def.validate(&manager);

        let started = Instant::now();
        let err = def.wait_for_loaded().unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailedState { .. }));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn wait_for_loaded_times_out_on_never_loading_definition() {
        let def = definition();
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let err = def.wait_for_loaded_timeout(timeout).unwrap_err();
        assert!(matches!(err, PipelineError::WaitForLoadedTimeout { .. }));
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn retire_blocks_finalization_while_guards_outstanding() {
        let manager = manager();
        let def = definition();
        def.validate(&manager).unwrap();

        let guard = def.wait_for_loaded().unwrap();
        def.retire(&manager);
        assert_eq!(def.state_code(), PipelineStateCode::Retired);
        assert!(!def.can_be_finalized());
        drop(guard);
        assert!(def.can_be_finalized());

        assert!(matches!(
            def.wait_for_loaded(),
            Err(PipelineError::Retired { .. })
        ));
    }

    #[test]
    fn reload_after_retire_is_rejected() {
        let manager = manager();
        let def = definition();
        def.validate(&manager).unwrap();
        def.retire(&manager);
        assert!(matches!(
            def.reload(&manager, GraphConfig::from_text("demo", GRAPH_SOURCE)),
            Err(PipelineError::Retired { .. })
        ));
    }

    #[test]
    fn executor_snapshot_survives_reload() {
        let manager = manager();
        let def = definition();
        def.validate(&manager).unwrap();

        let executor = def.executor().unwrap();
        assert_eq!(executor.spec().nodes.len(), 1);

        let two_nodes = r#"{
            "input_streams": ["REQUEST:in"],
            "output_streams": ["RESPONSE:out"],
            "nodes": [
                {"calculator": "A", "input_streams": ["REQUEST:in"], "output_streams": ["mid"]},
                {"calculator": "B", "input_streams": ["mid"], "output_streams": ["RESPONSE:out"]}
            ]
        }"#;
        def.reload(&manager, GraphConfig::from_text("demo", two_nodes))
            .unwrap();

        // The in-flight snapshot still sees the pre-reload structure.
        assert_eq!(executor.spec().nodes.len(), 1);
        let fresh = def.executor().unwrap();
        assert_eq!(fresh.spec().nodes.len(), 2);
    }
}
