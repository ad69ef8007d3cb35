//! Round-Robin Allocator
//!
//! Adds to the node with the fewest devices and removes the least utilized
//! device from the least utilized node. Every comparison is strict, so the
//! first candidate in topology order wins a tie.

use super::{Allocator, RemovalTarget};
use crate::config::Class;
use crate::error::{Error, Result};
use crate::topology::{Device, Pool, StorageNode, Topology};
use tracing::debug;

/// Spreads devices evenly over the nodes of the cluster
#[derive(Debug, Clone, Default)]
pub struct RoundRobinAllocator;

impl RoundRobinAllocator {
    /// Create a new round-robin allocator
    pub fn new() -> Self {
        Self
    }

    /// Least utilized pool of a class on one node
    fn least_utilized_pool<'a>(node: &'a StorageNode, class: &Class) -> Option<&'a Pool> {
        let mut selected: Option<&Pool> = None;
        for pool in node.pools.values().filter(|p| p.class == class.name) {
            match selected {
                Some(current) if pool.utilization >= current.utilization => {}
                _ => selected = Some(pool),
            }
        }
        selected
    }

    /// Least utilized device from a candidate list
    fn least_utilized_device<'a>(candidates: impl Iterator<Item = &'a Device>) -> Option<&'a Device> {
        let mut selected: Option<&Device> = None;
        for device in candidates {
            match selected {
                Some(current) if device.utilization >= current.utilization => {}
                _ => selected = Some(device),
            }
        }
        selected
    }
}

impl Allocator for RoundRobinAllocator {
    fn determine_node_to_add_storage<'a>(
        &self,
        topology: &'a Topology,
        class: &Class,
    ) -> Result<&'a StorageNode> {
        let mut selected: Option<&StorageNode> = None;
        for node in &topology.nodes {
            match selected {
                Some(current) if node.devices.len() >= current.devices.len() => {}
                _ => selected = Some(node),
            }
        }

        let node = selected.ok_or(Error::NoStorageNodes)?;
        debug!(
            class = %class.name,
            node = %node.id(),
            devices = node.devices.len(),
            "Selected node to add storage"
        );
        Ok(node)
    }

    fn determine_storage_to_remove<'a>(
        &self,
        topology: &'a Topology,
        class: &Class,
    ) -> Option<RemovalTarget<'a>> {
        // Least utilized node that holds the class
        let mut selected: Option<(&StorageNode, u32)> = None;
        for node in topology.nodes.iter().filter(|n| n.has_class(class)) {
            let utilization = node.utilization(class);
            match selected {
                Some((_, current)) if utilization >= current => {}
                _ => selected = Some((node, utilization)),
            }
        }
        let (node, _) = selected?;

        let pool = Self::least_utilized_pool(node, class);
        let device = match pool {
            // An empty pool yields no device, never one from outside the pool
            Some(pool) => Self::least_utilized_device(
                node.devices_on_pool(pool)
                    .filter(|d| d.class == class.name),
            ),
            None => Self::least_utilized_device(node.devices_for_class(class)),
        };

        debug!(
            class = %class.name,
            node = %node.id(),
            pool = ?pool.map(|p| p.name.as_str()),
            device = ?device.map(|d| d.id.as_str()),
            "Selected storage to remove"
        );
        Some(RemovalTarget { node, pool, device })
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
