//! Shared test doubles: deterministic graph runtimes and tensor builders.

use crate::pipeline::{GraphPorts, GraphRuntime, GraphSpec, PipelineError};
use crate::tensor::{Precision, TensorInfo};

/// Minimal valid graph source used across lifecycle tests.
pub const GRAPH_SOURCE: &str = r#"{
    "input_streams": ["REQUEST:in"],
    "output_streams": ["RESPONSE:out"],
    "nodes": [
        {
            "calculator": "InferenceCalculator",
            "input_streams": ["REQUEST:in"],
            "output_streams": ["RESPONSE:out"]
        }
    ]
}"#;

/// Dry-build double that resolves every declared stream to the same fixed
/// layout.
pub struct StaticGraphRuntime {
    pub shape: Vec<usize>,
    pub precision: Precision,
}

impl Default for StaticGraphRuntime {
    fn default() -> Self {
        Self {
            shape: vec![1, 4],
            precision: Precision::F32,
        }
    }
}

impl GraphRuntime for StaticGraphRuntime {
    fn build(&self, spec: &GraphSpec) -> crate::pipeline::Result<GraphPorts> {
        let mut ports = GraphPorts::default();
        for stream in &spec.input_streams {
            let name = crate::pipeline::stream_name(stream);
            ports.inputs.insert(
                name.to_string(),
                TensorInfo::new(name, self.shape.clone(), self.precision),
            );
        }
        for stream in &spec.output_streams {
            let name = crate::pipeline::stream_name(stream);
            ports.outputs.insert(
                name.to_string(),
                TensorInfo::new(name, self.shape.clone(), self.precision),
            );
        }
        Ok(ports)
    }
}

/// Dry-build double that always fails, for validation-failure paths.
pub struct FailingGraphRuntime {
    reason: String,
}

impl FailingGraphRuntime {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl GraphRuntime for FailingGraphRuntime {
    fn build(&self, _spec: &GraphSpec) -> crate::pipeline::Result<GraphPorts> {
        Err(PipelineError::Runtime(self.reason.clone()))
    }
}
