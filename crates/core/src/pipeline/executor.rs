//! Per-request view of a pipeline definition.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::GraphSpec;
use super::definition::UnloadGuard;
use super::error::{PipelineError, Result};
use crate::tensor::{shape_to_string, Tensor, TensorMap};

/// Structure snapshot handed to one request, valid for the lifetime of the
/// embedded unload guard.
///
/// The snapshot is immutable: reloads swap the definition's metadata but
/// never mutate the `Arc`s captured here, so the request executes against
/// the structure it was admitted with. Actual node scheduling happens in
/// the external graph engine; this type only carries the wiring and the
/// declared I/O layouts.
pub struct PipelineExecutor {
    name: String,
    version: u64,
    spec: Arc<GraphSpec>,
    inputs_info: Arc<TensorMap>,
    outputs_info: Arc<TensorMap>,
    _guard: UnloadGuard,
}

impl PipelineExecutor {
    pub(super) fn new(
        name: String,
        version: u64,
        spec: Arc<GraphSpec>,
        inputs_info: Arc<TensorMap>,
        outputs_info: Arc<TensorMap>,
        guard: UnloadGuard,
    ) -> Self {
        Self {
            name,
            version,
            spec,
            inputs_info,
            outputs_info,
            _guard: guard,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn spec(&self) -> &GraphSpec {
        &self.spec
    }

    pub fn inputs_info(&self) -> &TensorMap {
        &self.inputs_info
    }

    pub fn outputs_info(&self) -> &TensorMap {
        &self.outputs_info
    }

    /// Check request tensors against the declared input layouts.
    ///
    /// Mismatches are client-visible errors; nothing is coerced.
    pub fn check_request_inputs(&self, inputs: &BTreeMap<String, Tensor>) -> Result<()> {
        for (name, info) in self.inputs_info.iter() {
            let tensor = inputs
                .get(name)
                .ok_or_else(|| PipelineError::RequestInputMissing {
                    input: name.clone(),
                })?;
            if !info.matches(tensor) {
                return Err(PipelineError::RequestInputMismatch {
                    input: name.clone(),
                    expected: format!("{} {}", info.precision, shape_to_string(&info.shape)),
                    actual: format!(
                        "{} {}",
                        tensor.precision(),
                        shape_to_string(tensor.shape())
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::GraphConfig;
    use crate::pipeline::definition::PipelineDefinition;
    use crate::pipeline::manager::PipelineManager;
    use crate::testing::{StaticGraphRuntime, GRAPH_SOURCE};

    fn executor() -> PipelineExecutor {
        let manager = PipelineManager::new(Arc::new(StaticGraphRuntime::default()));
        let def = PipelineDefinition::new(GraphConfig::from_text("demo", GRAPH_SOURCE));
        def.validate(&manager).unwrap();
        def.executor().unwrap()
    }

    #[test]
    fn accepts_matching_request_inputs() {
        let executor = executor();
        let mut inputs = BTreeMap::new();
        // StaticGraphRuntime declares (1,4) f32 ports.
        inputs.insert(
            "in".to_string(),
            Tensor::from_f32(vec![1, 4], &[0.0; 4]).unwrap(),
        );
        executor.check_request_inputs(&inputs).unwrap();
    }

    #[test]
    fn rejects_layout_mismatch_and_missing_input() {
        let executor = executor();

        let mut inputs = BTreeMap::new();
        inputs.insert(
            "in".to_string(),
            Tensor::from_i64(vec![1, 4], &[0; 4]).unwrap(),
        );
        assert!(matches!(
            executor.check_request_inputs(&inputs),
            Err(PipelineError::RequestInputMismatch { .. })
        ));

        assert!(matches!(
            executor.check_request_inputs(&BTreeMap::new()),
            Err(PipelineError::RequestInputMissing { .. })
        ));
    }
}
