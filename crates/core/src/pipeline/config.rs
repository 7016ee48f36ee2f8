//! Graph configuration and the parsed graph structure.
//!
//! A [`GraphConfig`] names a pipeline and points at its graph source, either
//! inline text or a file path. The source reference is retained so a reload
//! can re-read it. The source itself parses into a [`GraphSpec`], the
//! structured configuration handed to the external graph runtime.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use super::error::{PipelineError, Result};

/// Declared configuration of one named pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub name: String,
    /// Path to a graph source file; re-read on every reload.
    #[serde(default)]
    pub graph_path: Option<PathBuf>,
    /// Inline graph source, takes precedence over `graph_path`.
    #[serde(default)]
    pub graph_text: Option<String>,
}

impl GraphConfig {
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph_path: None,
            graph_text: Some(text.into()),
        }
    }

    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            graph_path: Some(path.into()),
            graph_text: None,
        }
    }

    /// Fetch the graph source. File-backed configs pick up edits on reload.
    pub fn read_source(&self) -> Result<String> {
        if let Some(text) = &self.graph_text {
            return Ok(text.clone());
        }
        if let Some(path) = &self.graph_path {
            return fs::read_to_string(path).map_err(|_| PipelineError::ConfigFileMissing {
                path: path.display().to_string(),
            });
        }
        Err(PipelineError::Validation {
            name: self.name.clone(),
            reason: "config declares neither graph_text nor graph_path".to_string(),
        })
    }
}

/// One node of the graph: a calculator wired to named streams.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeSpec {
    pub calculator: String,
    #[serde(default)]
    pub input_streams: Vec<String>,
    #[serde(default)]
    pub output_streams: Vec<String>,
}

/// Parsed structured graph configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub input_streams: Vec<String>,
    #[serde(default)]
    pub output_streams: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl GraphSpec {
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| PipelineError::Validation {
            name: name.to_string(),
            reason: format!("graph source is not valid JSON: {e}"),
        })
    }

    /// Structural checks that need no graph runtime: the graph must declare
    /// I/O streams with resolvable names, and nodes must name a calculator.
    pub fn check_structure(&self, name: &str) -> Result<()> {
        let fail = |reason: String| {
            Err(PipelineError::Validation {
                name: name.to_string(),
                reason,
            })
        };
        if self.input_streams.is_empty() {
            return fail("graph declares no input streams".to_string());
        }
        if self.output_streams.is_empty() {
            return fail("graph declares no output streams".to_string());
        }
        for stream in self.input_streams.iter().chain(&self.output_streams) {
            if stream_name(stream).is_empty() {
                return fail(format!("malformed stream name: {stream}"));
            }
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.calculator.is_empty() {
                return fail(format!("node {i} declares no calculator"));
            }
        }
        Ok(())
    }
}

/// Strip the tag from a full stream name: `"TAG:name"` resolves to `name`,
/// a bare `"name"` resolves to itself, anything else to an empty string.
pub fn stream_name(stream_full_name: &str) -> &str {
    let mut tokens = stream_full_name.split(':');
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(name), None, _) => name,
        (Some(_tag), Some(name), None) => name,
        _ => "",
    }
}
