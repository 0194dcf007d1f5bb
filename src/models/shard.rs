//! Shard addressing.
//!
//! A client identifier maps to exactly one shard through 32-bit FNV-1a over its
//! UTF-8 bytes, modulo the deployment's shard count. The mapping must stay fixed
//! for the lifetime of a deployment; changing it requires a full re-partition.

use serde::{Deserialize, Serialize};
use std::fmt;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Index of one horizontal partition, in `[0, shard_count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardIndex(u32);

impl ShardIndex {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed partitioning of the data set for one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayout {
    shard_count: u32,
}

impl ShardLayout {
    /// Create a layout; a zero shard count is clamped to one
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Every shard index of the layout, ascending
    pub fn indices(&self) -> impl Iterator<Item = ShardIndex> {
        (0..self.shard_count).map(ShardIndex)
    }

    pub fn contains(&self, shard: ShardIndex) -> bool {
        shard.0 < self.shard_count
    }

    /// Shard owning `client_id`
    pub fn shard_of(&self, client_id: &str) -> ShardIndex {
        ShardIndex(fnv1a_32(client_id.as_bytes()) % self.shard_count)
    }
}

impl Default for ShardLayout {
    fn default() -> Self {
        Self::new(crate::constants::system::DEFAULT_SHARD_COUNT)
    }
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}
