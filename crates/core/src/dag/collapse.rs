//! Fan-out structure of a demultiplied graph region.

use super::error::{GatherError, Result};

/// How a branch of the graph was demultiplied before reaching a gather
/// point: one positive fan-out size per nesting level, outermost first.
///
/// The product of all sizes is the total shard count the gather point
/// expects. Constructed once when the graph structure is built and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapseDetails {
    sizes: Vec<usize>,
}

impl CollapseDetails {
    pub fn new(sizes: Vec<usize>) -> Result<Self> {
        if sizes.is_empty() || sizes.iter().any(|&s| s == 0) {
            return Err(GatherError::InvalidCollapseSizes { sizes });
        }
        Ok(Self { sizes })
    }

    /// One level with the given fan-out.
    pub fn single_level(size: usize) -> Result<Self> {
        Self::new(vec![size])
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn levels(&self) -> usize {
        self.sizes.len()
    }

    /// Total number of shards feeding the gather point.
    pub fn total_shards(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Row-major decomposition of a shard id onto the collapsed dimensions.
    ///
    /// Shard `k` lands at exactly these leading-dimension coordinates in the
    /// consolidated tensor.
    pub fn decompose(&self, shard_id: usize) -> Vec<usize> {
        let mut coords = vec![0; self.sizes.len()];
        let mut rest = shard_id;
        for (coord, &size) in coords.iter_mut().zip(self.sizes.iter()).rev() {
            *coord = rest % size;
            rest /= size;
        }
        coords
    }
}
