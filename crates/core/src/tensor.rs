//! Tensor metadata and owned byte buffers exchanged with the inference runtime.
//!
//! The orchestration core never interprets tensor contents. Everything here is
//! shape/precision/byte-size arithmetic: validating that a buffer matches its
//! declared layout, and describing pipeline I/O ports to the protocol layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from tensor construction and layout checks.
#[derive(Debug, Error)]
pub enum TensorError {
    /// Buffer length disagrees with the declared shape and element size.
    #[error("byte length {actual} does not match shape {shape} x {element_size} bytes per element = {expected}")]
    ByteLengthMismatch {
        shape: String,
        element_size: usize,
        expected: usize,
        actual: usize,
    },
}

/// Element precision of a tensor.
///
/// String tensors carry length-prefixed UTF-8 payloads and have no fixed
/// element size; all size arithmetic for them works on raw byte lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    F32,
    I64,
    Utf8String,
}

impl Precision {
    /// Element size in bytes for fixed-width precisions.
    pub fn size_bytes(&self) -> Option<usize> {
        match self {
            Precision::F32 => Some(4),
            Precision::I64 => Some(8),
            Precision::Utf8String => None,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Precision::F32 => "f32",
            Precision::I64 => "i64",
            Precision::Utf8String => "utf8_string",
        };
        f.write_str(s)
    }
}

/// Format a shape for log and error messages, e.g. `(2,3,1,4)`.
pub fn shape_to_string(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("({})", dims.join(","))
}

/// A typed, shaped block of opaque data.
///
/// Exclusively owned by whichever component last produced it: the inference
/// runtime for node outputs, a shard store entry for in-flight fragments, or
/// the gather handler for a consolidated result.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    precision: Precision,
    data: Vec<u8>,
}

impl Tensor {
    /// Wrap an owned buffer, checking it against the declared layout.
    ///
    /// For fixed-width precisions the buffer must hold exactly
    /// `product(shape)` elements. String tensors are exempt.
    pub fn new(shape: Vec<usize>, precision: Precision, data: Vec<u8>) -> Result<Self, TensorError> {
        if let Some(element_size) = precision.size_bytes() {
            let expected = shape.iter().product::<usize>() * element_size;
            if expected != data.len() {
                return Err(TensorError::ByteLengthMismatch {
                    shape: shape_to_string(&shape),
                    element_size,
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(Self {
            shape,
            precision,
            data,
        })
    }

    /// Build an f32 tensor from values in row-major order.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self, TensorError> {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(shape, Precision::F32, data)
    }

    /// Build an i64 tensor from values in row-major order.
    pub fn from_i64(shape: Vec<usize>, values: &[i64]) -> Result<Self, TensorError> {
        let mut data = Vec::with_capacity(values.len() * 8);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(shape, Precision::I64, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Shape/precision descriptor for one named pipeline input or output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub precision: Precision,
}

impl TensorInfo {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, precision: Precision) -> Self {
        Self {
            name: name.into(),
            shape,
            precision,
        }
    }

    /// Whether a concrete tensor matches this declared layout.
    pub fn matches(&self, tensor: &Tensor) -> bool {
        tensor.precision() == self.precision && tensor.shape() == self.shape.as_slice()
    }
}

/// Port name to descriptor map, as published by a pipeline definition.
pub type TensorMap = BTreeMap<String, TensorInfo>;
