//! Registry of pipeline definitions and the boundary with the external
//! graph runtime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::config::{GraphConfig, GraphSpec};
use super::definition::PipelineDefinition;
use super::error::{PipelineError, Result};
use super::executor::PipelineExecutor;
use crate::tensor::TensorMap;

/// Input/output descriptors resolved by a dry construction of the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphPorts {
    pub inputs: TensorMap,
    pub outputs: TensorMap,
}

/// Boundary with the external graph execution engine.
///
/// The core supplies the structured configuration; the runtime resolves
/// what tensors flow at the declared ports without executing any node.
/// Node scheduling and actual inference stay on the runtime's side.
pub trait GraphRuntime: Send + Sync {
    fn build(&self, spec: &GraphSpec) -> Result<GraphPorts>;
}

/// Name-keyed registry of pipeline definitions.
///
/// Definitions stay registered whatever their lifecycle state; a failed
/// validation leaves the definition queryable (and reloadable) under its
/// name.
pub struct PipelineManager {
    runtime: Arc<dyn GraphRuntime>,
    definitions: RwLock<HashMap<String, Arc<PipelineDefinition>>>,
}

impl PipelineManager {
    pub fn new(runtime: Arc<dyn GraphRuntime>) -> Self {
        Self {
            runtime,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &dyn GraphRuntime {
        self.runtime.as_ref()
    }

    /// Register a new definition under its configured name and validate it.
    ///
    /// The definition remains registered even when validation fails, so a
    /// later reload can repair it in place.
    pub fn register(&self, config: GraphConfig) -> Result<Arc<PipelineDefinition>> {
        let name = config.name.clone();
        let definition = Arc::new(PipelineDefinition::new(config));
        {
            let mut definitions = self.definitions.write().unwrap();
            if definitions.contains_key(&name) {
                return Err(PipelineError::AlreadyRegistered { name });
            }
            definitions.insert(name.clone(), definition.clone());
        }
        info!(pipeline = %name, "pipeline definition registered");
        definition.validate(self)?;
        Ok(definition)
    }

    pub fn find(&self, name: &str) -> Result<Arc<PipelineDefinition>> {
        self.definitions
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::DefinitionNotFound {
                name: name.to_string(),
            })
    }

    /// Apply a configuration: reload the definition if the name is known,
    /// register it otherwise.
    pub fn apply(&self, config: GraphConfig) -> Result<Arc<PipelineDefinition>> {
        match self.find(&config.name) {
            Ok(definition) => {
                definition.reload(self, config)?;
                Ok(definition)
            }
            Err(PipelineError::DefinitionNotFound { .. }) => self.register(config),
            Err(e) => Err(e),
        }
    }

    pub fn retire(&self, name: &str) -> Result<()> {
        let definition = self.find(name)?;
        definition.retire(self);
        Ok(())
    }

    /// Admit a request against the named definition: waits for it to load
    /// and returns a guarded structure snapshot.
    pub fn request_executor(&self, name: &str) -> Result<PipelineExecutor> {
        self.find(name)?.executor()
    }
}
