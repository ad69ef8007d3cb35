//! Allocator Module
//!
//! Strategies that decide where new storage goes and which storage is given
//! back. An allocator only reads the topology snapshot it is handed; it never
//! talks to a provider.

pub mod round_robin;

pub use round_robin::RoundRobinAllocator;

use crate::config::Class;
use crate::error::Result;
use crate::topology::{Device, Pool, StorageNode, Topology};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Allocator Port
// =============================================================================

/// What to take out of the cluster when shrinking a class
#[derive(Debug, Clone, Copy)]
pub struct RemovalTarget<'a> {
    /// Node holding the storage to remove
    pub node: &'a StorageNode,
    /// Pool the device belongs to, if the node pools this class
    pub pool: Option<&'a Pool>,
    /// Device to remove
    pub device: Option<&'a Device>,
}

/// Placement strategy for adding and removing storage
pub trait Allocator: Send + Sync {
    /// Node which should receive the next disk set for a class
    fn determine_node_to_add_storage<'a>(
        &self,
        topology: &'a Topology,
        class: &Class,
    ) -> Result<&'a StorageNode>;

    /// Storage to remove for a class, or `None` if the class has no devices
    fn determine_storage_to_remove<'a>(
        &self,
        topology: &'a Topology,
        class: &Class,
    ) -> Option<RemovalTarget<'a>>;

    /// Strategy name
    fn name(&self) -> &'static str;
}

/// Shared allocator handle
pub type AllocatorRef = Arc<dyn Allocator>;

// =============================================================================
// Allocator Selection
// =============================================================================

/// Allocation strategies that can be selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocatorKind {
    /// Spread devices evenly across nodes
    #[default]
    RoundRobin,
}

impl AllocatorKind {
    /// Instantiate the strategy
    pub fn build(self) -> AllocatorRef {
        match self {
            AllocatorKind::RoundRobin => Arc::new(RoundRobinAllocator::new()),
        }
    }
}

impl std::fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatorKind::RoundRobin => write!(f, "round-robin"),
        }
    }
}
