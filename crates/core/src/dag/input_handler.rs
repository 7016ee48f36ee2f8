//! Dependency gating for graph node inputs.
//!
//! Each scheduled node instance tracks how many upstream dependencies are
//! still outstanding. Producer branches store inputs as they finish and
//! signal completion; exactly one completion call observes the counter
//! reaching zero and releases the collected inputs to the node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::error;

use super::error::{GatherError, Result};
use crate::tensor::Tensor;

/// Outcome of a `notify_finished_dependency` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Other dependencies are still outstanding.
    Pending,
    /// This call observed the transition to zero; the node may consume its
    /// inputs.
    Ready,
}

/// Dependency gate for one graph node instance.
///
/// The counter is decremented with `fetch_sub(AcqRel)`, so the single caller
/// that sees the 1-to-0 transition also observes every input stored before
/// any of the preceding decrements. The counter never re-arms.
#[derive(Debug)]
pub struct NodeInputHandler {
    remaining_dependencies: AtomicUsize,
    input_tensors: Mutex<HashMap<String, Tensor>>,
}

impl NodeInputHandler {
    pub fn new(inputs_missing_count: usize) -> Result<Self> {
        if inputs_missing_count == 0 {
            return Err(GatherError::NoDependencies);
        }
        Ok(Self {
            remaining_dependencies: AtomicUsize::new(inputs_missing_count),
            input_tensors: Mutex::new(HashMap::new()),
        })
    }

    /// Store a ready (non-sharded) input for the node.
    ///
    /// Delivering the same input name twice is a wiring defect of the graph
    /// engine, not a race to resolve; the first value is retained.
    pub fn set_input(&self, input_name: &str, tensor: Tensor) -> Result<()> {
        if input_name.is_empty() {
            return Err(GatherError::EmptyInputName);
        }
        let mut inputs = self.input_tensors.lock().unwrap();
        if inputs.contains_key(input_name) {
            error!(input = input_name, "tried to set the same input twice");
            return Err(GatherError::DuplicateInput {
                input: input_name.to_string(),
            });
        }
        inputs.insert(input_name.to_string(), tensor);
        Ok(())
    }

    /// Record one finished dependency.
    ///
    /// Returns [`Readiness::Ready`] to exactly one caller: the one whose
    /// decrement took the counter from 1 to 0.
    pub fn notify_finished_dependency(&self) -> Result<Readiness> {
        match self.remaining_dependencies.fetch_sub(1, Ordering::AcqRel) {
            0 => {
                // Undo the underflowing decrement; the counter stays at zero.
                self.remaining_dependencies.fetch_add(1, Ordering::AcqRel);
                error!("dependency counter decremented past zero");
                Err(GatherError::CounterUnderflow)
            }
            1 => Ok(Readiness::Ready),
            _ => Ok(Readiness::Pending),
        }
    }

    pub fn remaining_dependencies(&self) -> usize {
        self.remaining_dependencies.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.remaining_dependencies() == 0
    }

    /// Hand the collected inputs to the node. Subsequent calls return an
    /// empty map; each input is consumed exactly once.
    pub fn take_inputs(&self) -> HashMap<String, Tensor> {
        std::mem::take(&mut *self.input_tensors.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Precision, Tensor};

    fn tensor() -> Tensor {
        Tensor::new(vec![2], Precision::I64, vec![0u8; 16]).unwrap()
    }

    #[test]
    fn requires_at_least_one_dependency() {
        assert!(matches!(
            NodeInputHandler::new(0),
            Err(GatherError::NoDependencies)
        ));
    }

    #[test]
    fn last_notification_reports_ready_exactly_once() {
        let handler = NodeInputHandler::new(3).unwrap();
        assert_eq!(
            handler.notify_finished_dependency().unwrap(),
            Readiness::Pending
        );
        assert_eq!(
            handler.notify_finished_dependency().unwrap(),
            Readiness::Pending
        );
        assert_eq!(
            handler.notify_finished_dependency().unwrap(),
            Readiness::Ready
        );
        assert!(handler.is_ready());
        assert!(matches!(
            handler.notify_finished_dependency(),
            Err(GatherError::CounterUnderflow)
        ));
    }

    #[test]
    fn duplicate_input_is_rejected_and_first_value_kept() {
        let handler = NodeInputHandler::new(1).unwrap();
        let first = Tensor::from_i64(vec![1], &[7]).unwrap();
        handler.set_input("x", first.clone()).unwrap();
        assert!(matches!(
            handler.set_input("x", tensor()),
            Err(GatherError::DuplicateInput { .. })
        ));
        let inputs = handler.take_inputs();
        assert_eq!(inputs.get("x"), Some(&first));
    }

    #[test]
    fn inputs_are_taken_once() {
        let handler = NodeInputHandler::new(1).unwrap();
        handler.set_input("a", tensor()).unwrap();
        assert_eq!(handler.take_inputs().len(), 1);
        assert!(handler.take_inputs().is_empty());
    }

    #[test]
    fn empty_input_name_is_rejected() {
        let handler = NodeInputHandler::new(1).unwrap();
        assert!(matches!(
            handler.set_input("", tensor()),
            Err(GatherError::EmptyInputName)
        ));
    }
}
