//! Scatter/gather consolidation of sharded node inputs.
//!
//! A demultiplied graph region produces one tensor fragment per shard. The
//! gather handler collects fragments per input name while the dependency
//! counter runs down; the final notification merges every input's shards
//! into a single tensor whose leading dimensions are the collapse sizes and
//! whose trailing dimensions are the per-shard shape.

use std::collections::{btree_map, BTreeMap, HashMap};
use std::sync::Mutex;

use tracing::{debug, error};

use super::collapse::CollapseDetails;
use super::error::{GatherError, Result};
use super::input_handler::{NodeInputHandler, Readiness};
use crate::tensor::{shape_to_string, Tensor};

/// Fragments of one named input, keyed by dense 0-based shard id.
type ShardMap = BTreeMap<usize, Tensor>;

/// Dependency gate for a gather node: collects shards and consolidates them
/// on the final dependency.
///
/// `set_input` may be called concurrently from distinct producer branches;
/// the store lock is held only for the slot insertion. A second insert at
/// the same `(input, shard_id)` pair is a wiring defect and fails without
/// overwriting. The consolidating read happens on the single thread that
/// observes the dependency counter's zero crossing, after the counter's
/// acquire/release decrement has made all prior insertions visible.
pub struct GatherInputHandler {
    base: NodeInputHandler,
    collapse: CollapseDetails,
    shard_store: Mutex<HashMap<String, ShardMap>>,
}

impl GatherInputHandler {
    /// `inputs_missing_count` is the number of gathered inputs still
    /// expected per shard; the handler waits for that count multiplied by
    /// the total shard fan-out.
    pub fn new(inputs_missing_count: usize, collapse: CollapseDetails) -> Result<Self> {
        if inputs_missing_count == 0 {
            return Err(GatherError::NoDependencies);
        }
        // CollapseDetails construction guarantees a positive product.
        let total = inputs_missing_count * collapse.total_shards();
        Ok(Self {
            base: NodeInputHandler::new(total)?,
            collapse,
            shard_store: Mutex::new(HashMap::new()),
        })
    }

    pub fn collapse(&self) -> &CollapseDetails {
        &self.collapse
    }

    pub fn remaining_dependencies(&self) -> usize {
        self.base.remaining_dependencies()
    }

    /// Store one shard of a named input.
    pub fn set_input(&self, input_name: &str, tensor: Tensor, shard_id: usize) -> Result<()> {
        if input_name.is_empty() {
            return Err(GatherError::EmptyInputName);
        }
        let total_shards = self.collapse.total_shards();
        if shard_id >= total_shards {
            return Err(GatherError::ShardIdOutOfRange {
                shard_id,
                total_shards,
            });
        }
        let mut store = self.shard_store.lock().unwrap();
        let shards = store.entry(input_name.to_string()).or_default();
        match shards.entry(shard_id) {
            btree_map::Entry::Occupied(_) => {
                error!(
                    input = input_name,
                    shard_id, "tried to insert the same shard twice"
                );
                Err(GatherError::DuplicateShard {
                    input: input_name.to_string(),
                    shard_id,
                })
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(tensor);
                Ok(())
            }
        }
    }

    /// Record one finished dependency; the caller that observes the zero
    /// crossing consolidates every collected input and publishes the merged
    /// tensors to the node input map.
    ///
    /// Any consolidation failure discards the whole in-progress merge: no
    /// partially filled tensor is ever published.
    pub fn notify_finished_dependency(&self) -> Result<Readiness> {
        if self.base.notify_finished_dependency()? == Readiness::Pending {
            return Ok(Readiness::Pending);
        }
        self.consolidate()?;
        Ok(Readiness::Ready)
    }

    /// Hand the node its inputs (consolidated tensors included) exactly once.
    pub fn take_inputs(&self) -> HashMap<String, Tensor> {
        self.base.take_inputs()
    }

    fn consolidate(&self) -> Result<()> {
        let store = std::mem::take(&mut *self.shard_store.lock().unwrap());
        // Merge every input before publishing anything: a failure on one
        // input must not leave other inputs' results visible downstream.
        let mut consolidated = Vec::with_capacity(store.len());
        for (input_name, shards) in &store {
            consolidated.push((input_name, self.consolidate_input(input_name, shards)?));
        }
        for (input_name, tensor) in consolidated {
            self.base.set_input(input_name, tensor)?;
        }
        Ok(())
    }

    fn consolidate_input(&self, input_name: &str, shards: &ShardMap) -> Result<Tensor> {
        debug!(
            input = input_name,
            shards = shards.len(),
            "consolidating shards"
        );
        let reference = shards
            .get(&0)
            .ok_or_else(|| GatherError::MissingReferenceShard {
                input: input_name.to_string(),
            })?;
        let shard_shape = reference.shape().to_vec();
        let precision = reference.precision();
        let shard_bytes = reference.byte_size();

        let mut consolidated_shape = self.collapse.sizes().to_vec();
        consolidated_shape.extend_from_slice(&shard_shape);
        let mut data = vec![0u8; shard_bytes * self.collapse.total_shards()];

        for (&shard_id, tensor) in shards {
            // Byte size can still differ for string tensors, where shape
            // alone does not fix the payload length.
            if tensor.precision() != precision
                || tensor.shape() != shard_shape.as_slice()
                || tensor.byte_size() != shard_bytes
            {
                error!(
                    input = input_name,
                    shard_id,
                    expected_precision = %precision,
                    expected_shape = %shape_to_string(&shard_shape),
                    actual_precision = %tensor.precision(),
                    actual_shape = %shape_to_string(tensor.shape()),
                    "failed to consolidate shards: layout differs from reference shard"
                );
                return Err(GatherError::ShardInconsistency {
                    input: input_name.to_string(),
                    shard_id,
                    expected_precision: precision,
                    expected_shape: shape_to_string(&shard_shape),
                    actual_precision: tensor.precision(),
                    actual_shape: shape_to_string(tensor.shape()),
                });
            }
            let offset = shard_id * shard_bytes;
            data[offset..offset + shard_bytes].copy_from_slice(tensor.data());
        }

        Tensor::new(consolidated_shape, precision, data).map_err(|source| {
            GatherError::Consolidation {
                input: input_name.to_string(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Precision;

    fn shard(byte: u8) -> Tensor {
        // shape (1,4) f32 = 16 bytes
        Tensor::new(vec![1, 4], Precision::F32, vec![byte; 16]).unwrap()
    }

    fn collapse_2x3() -> CollapseDetails {
        CollapseDetails::new(vec![2, 3]).unwrap()
    }

    #[test]
    fn consolidates_six_shards_into_leading_collapse_dims() {
        let handler = GatherInputHandler::new(1, collapse_2x3()).unwrap();
        // Adversarial arrival order.
        for id in [3, 0, 5, 1, 4, 2] {
            handler.set_input("x", shard(id as u8), id).unwrap();
            let readiness = handler.notify_finished_dependency().unwrap();
            assert_eq!(
                readiness,
                if id == 2 {
                    Readiness::Ready
                } else {
                    Readiness::Pending
                }
            );
        }
        let mut inputs = handler.take_inputs();
        let consolidated = inputs.remove("x").unwrap();
        assert_eq!(consolidated.shape(), &[2, 3, 1, 4]);
        assert_eq!(consolidated.precision(), Precision::F32);
        assert_eq!(consolidated.byte_size(), 96);
        for k in 0..6 {
            assert_eq!(
                &consolidated.data()[k * 16..(k + 1) * 16],
                vec![k as u8; 16].as_slice(),
                "shard {k} bytes misplaced"
            );
        }
    }

    #[test]
    fn duplicate_shard_slot_fails_and_keeps_first_value() {
        let handler = GatherInputHandler::new(1, collapse_2x3()).unwrap();
        handler.set_input("x", shard(0xAA), 2).unwrap();
        assert!(matches!(
            handler.set_input("x", shard(0xBB), 2),
            Err(GatherError::DuplicateShard { ref input, shard_id: 2 }) if input == "x"
        ));
        for id in [0, 1, 3, 4, 5] {
            handler.set_input("x", shard(id as u8), id).unwrap();
        }
        for _ in 0..6 {
            handler.notify_finished_dependency().unwrap();
        }
        let consolidated = handler.take_inputs().remove("x").unwrap();
        assert_eq!(&consolidated.data()[2 * 16..3 * 16], vec![0xAA; 16].as_slice());
    }

    #[test]
    fn inconsistent_shard_shape_fails_whole_consolidation() {
        let handler =
            GatherInputHandler::new(1, CollapseDetails::single_level(2).unwrap()).unwrap();
        handler.set_input("x", shard(1), 0).unwrap();
        let odd = Tensor::new(vec![2, 2], Precision::F32, vec![2; 16]).unwrap();
        handler.set_input("x", odd, 1).unwrap();
        handler.notify_finished_dependency().unwrap();
        let err = handler.notify_finished_dependency().unwrap_err();
        assert!(matches!(err, GatherError::ShardInconsistency { shard_id: 1, .. }));
        // Nothing was published.
        assert!(handler.take_inputs().is_empty());
    }

    #[test]
    fn failure_on_one_input_publishes_nothing_for_any_input() {
        let collapse = CollapseDetails::single_level(2).unwrap();
        let handler = GatherInputHandler::new(2, collapse).unwrap();
        // "a" is fully consistent; "b" carries a mismatched second shard.
        handler.set_input("a", shard(1), 0).unwrap();
        handler.set_input("a", shard(2), 1).unwrap();
        handler.set_input("b", shard(3), 0).unwrap();
        let odd = Tensor::new(vec![2, 2], Precision::F32, vec![4; 16]).unwrap();
        handler.set_input("b", odd, 1).unwrap();
        for _ in 0..3 {
            handler.notify_finished_dependency().unwrap();
        }
        let err = handler.notify_finished_dependency().unwrap_err();
        assert!(matches!(
            err,
            GatherError::ShardInconsistency { ref input, shard_id: 1, .. } if input == "b"
        ));
        // The consistent input must not leak out either.
        assert!(handler.take_inputs().is_empty());
    }

    #[test]
    fn inconsistent_shard_precision_is_rejected() {
        let handler =
            GatherInputHandler::new(1, CollapseDetails::single_level(2).unwrap()).unwrap();
        handler.set_input("x", shard(1), 0).unwrap();
        let odd = Tensor::new(vec![1, 4], Precision::I64, vec![2; 32]).unwrap();
        handler.set_input("x", odd, 1).unwrap();
        handler.notify_finished_dependency().unwrap();
        assert!(matches!(
            handler.notify_finished_dependency(),
            Err(GatherError::ShardInconsistency { .. })
        ));
    }

    #[test]
    fn string_shards_with_diverging_byte_sizes_are_rejected() {
        let handler =
            GatherInputHandler::new(1, CollapseDetails::single_level(2).unwrap()).unwrap();
        let a = Tensor::new(vec![1], Precision::Utf8String, b"\x03abc".to_vec()).unwrap();
        let b = Tensor::new(vec![1], Precision::Utf8String, b"\x05hello".to_vec()).unwrap();
        handler.set_input("x", a, 0).unwrap();
        handler.set_input("x", b, 1).unwrap();
        handler.notify_finished_dependency().unwrap();
        assert!(matches!(
            handler.notify_finished_dependency(),
            Err(GatherError::ShardInconsistency { .. })
        ));
    }

    #[test]
    fn missing_reference_shard_is_an_internal_error() {
        let handler =
            GatherInputHandler::new(1, CollapseDetails::single_level(2).unwrap()).unwrap();
        handler.set_input("x", shard(1), 1).unwrap();
        handler.notify_finished_dependency().unwrap();
        assert!(matches!(
            handler.notify_finished_dependency(),
            Err(GatherError::MissingReferenceShard { .. })
        ));
    }

    #[test]
    fn shard_id_must_be_within_fan_out() {
        let handler = GatherInputHandler::new(1, collapse_2x3()).unwrap();
        assert!(matches!(
            handler.set_input("x", shard(0), 6),
            Err(GatherError::ShardIdOutOfRange {
                shard_id: 6,
                total_shards: 6
            })
        ));
    }

    #[test]
    fn seed_count_multiplies_the_fan_out() {
        let handler = GatherInputHandler::new(2, collapse_2x3()).unwrap();
        assert_eq!(handler.remaining_dependencies(), 12);
        assert!(matches!(
            GatherInputHandler::new(0, collapse_2x3()),
            Err(GatherError::NoDependencies)
        ));
    }

    #[test]
    fn independent_inputs_are_each_consolidated() {
        let collapse = CollapseDetails::single_level(2).unwrap();
        let handler = GatherInputHandler::new(2, collapse).unwrap();
        for id in 0..2 {
            handler.set_input("a", shard(id as u8), id).unwrap();
            handler.set_input("b", shard(0x10 + id as u8), id).unwrap();
        }
        for _ in 0..4 {
            handler.notify_finished_dependency().unwrap();
        }
        let inputs = handler.take_inputs();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs["a"].shape(), &[2, 1, 4]);
        assert_eq!(&inputs["b"].data()[..16], vec![0x10; 16].as_slice());
    }
}
