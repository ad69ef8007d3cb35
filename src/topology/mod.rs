//! Topology Module
//!
//! The cluster as reported by the storage provider: nodes, their pools and
//! devices. A topology is a per-pass snapshot; every aggregate here is a pure
//! function of it.
//!
//! ```text
//! Topology
//!   └── StorageNode (instance id, zone)
//!         ├── Pool (set size, utilization, class)   keyed by name
//!         └── Device (cloud id, path, class, size, utilization, pool?)
//! ```

pub mod device;
pub mod node;

pub use device::*;
pub use node::*;

use crate::config::Class;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

// =============================================================================
// Provider Cookie
// =============================================================================

/// Opaque value a storage provider attaches to its topology entities.
///
/// Only the provider that created it reads it back, through a checked
/// downcast. The reconciliation core carries it along untouched.
#[derive(Clone)]
pub struct ProviderCookie(Arc<dyn Any + Send + Sync>);

impl ProviderCookie {
    /// Wrap a provider-owned value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Get the value back if it has the expected type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ProviderCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProviderCookie(..)")
    }
}

impl PartialEq for ProviderCookie {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// =============================================================================
// Topology
// =============================================================================

/// Entire topology of the storage system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Nodes of the cluster. Order is used only as a tie-break.
    #[serde(default)]
    pub nodes: Vec<StorageNode>,
    /// Opaque cluster-level handle owned by the storage provider
    #[serde(skip)]
    pub private: Option<ProviderCookie>,
}

impl Topology {
    /// Create a topology from a list of nodes
    pub fn new(nodes: Vec<StorageNode>) -> Self {
        Self {
            nodes,
            private: None,
        }
    }

    /// Average utilization for a class across the cluster.
    ///
    /// Mean of the per-node utilizations of nodes that have a matching pool
    /// or device. Returns 0 if none do.
    pub fn utilization(&self, class: &Class) -> u32 {
        let (sum, num) = self
            .nodes
            .iter()
            .filter(|n| n.raw_utilization(class).1 > 0)
            .fold((0u64, 0u64), |(sum, num), n| {
                (sum + n.utilization(class) as u64, num + 1)
            });
        if num == 0 {
            return 0;
        }
        (sum / num) as u32
    }

    /// Total storage in GiB allocated to a class across the cluster
    pub fn total_storage(&self, class: &Class) -> u64 {
        self.nodes.iter().map(|n| n.total_storage(class)).sum()
    }

    /// Confirms the topology has the information required to make decisions
    pub fn verify(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidTopology(
                "no storage nodes available in cluster".into(),
            ));
        }
        for node in &self.nodes {
            node.verify()?;
        }
        Ok(())
    }

    /// Total number of devices in the topology
    pub fn num_devices(&self) -> usize {
        self.nodes.iter().map(|n| n.devices.len()).sum()
    }

    /// Find a node by cloud instance ID
    pub fn node(&self, instance_id: &str) -> Option<&StorageNode> {
        self.nodes.iter().find(|n| n.id() == instance_id)
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in &self.nodes {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}
