//! Storage Node
//!
//! A cloud instance participating in the storage system, with its devices
//! and pools. Per-class aggregates are computed over pools when the node has
//! any, otherwise over its bare devices.

use super::{Device, Pool, ProviderCookie};
use crate::config::Class;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cloud information about an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    /// Cloud instance ID
    pub id: String,
    /// Cloud failure domain hint
    #[serde(default)]
    pub zone: String,
}

/// A node of the storage system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNode {
    /// Name of the node according to the storage system
    #[serde(default)]
    pub name: String,
    /// Cloud information about this instance
    pub metadata: InstanceMetadata,
    /// Devices on this node
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Pools on this node, keyed by pool name
    #[serde(default)]
    pub pools: BTreeMap<String, Pool>,
    /// Classes supported by this node. Empty means all.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Opaque handle owned by the storage provider
    #[serde(skip)]
    pub private: Option<ProviderCookie>,
}

impl StorageNode {
    /// Create an empty node for a cloud instance
    pub fn new(instance_id: impl Into<String>) -> Self {
        let id = instance_id.into();
        Self {
            name: id.clone(),
            metadata: InstanceMetadata {
                id,
                zone: String::new(),
            },
            ..Default::default()
        }
    }

    /// Cloud instance ID
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Sum of matching utilizations and how many entries matched.
    ///
    /// Pools are used when the node has any of the class, otherwise devices.
    pub fn raw_utilization(&self, class: &Class) -> (u64, usize) {
        if self.pools.values().any(|p| p.class == class.name) {
            self.pools
                .values()
                .filter(|p| p.class == class.name)
                .fold((0, 0), |(sum, num), p| (sum + p.utilization as u64, num + 1))
        } else {
            self.devices
                .iter()
                .filter(|d| d.class == class.name)
                .fold((0, 0), |(sum, num), d| (sum + d.utilization as u64, num + 1))
        }
    }

    /// Average utilization of the node for a class, 0 when nothing matches
    pub fn utilization(&self, class: &Class) -> u32 {
        match self.raw_utilization(class) {
            (_, 0) => 0,
            (sum, num) => (sum / num as u64) as u32,
        }
    }

    /// Total storage in GiB allocated to a class on this node
    pub fn total_storage(&self, class: &Class) -> u64 {
        self.devices
            .iter()
            .filter(|d| d.class == class.name)
            .map(|d| d.size_gb)
            .sum()
    }

    /// Number of disks to add for a class, and the pool receiving them.
    ///
    /// One disk with no pool unless the node has a pool of that class.
    pub fn set_size_for_class(&self, class: &Class) -> (usize, Option<&Pool>) {
        match self.pools.values().find(|p| p.class == class.name) {
            Some(pool) => (pool.set_size, Some(pool)),
            None => (1, None),
        }
    }

    /// Devices that are members of a pool
    pub fn devices_on_pool(&self, pool: &Pool) -> impl Iterator<Item = &Device> + '_ {
        let name = pool.name.clone();
        self.devices.iter().filter(move |d| d.in_pool(&name))
    }

    /// Devices of a class
    pub fn devices_for_class(&self, class: &Class) -> impl Iterator<Item = &Device> + '_ {
        let name = class.name.clone();
        self.devices.iter().filter(move |d| d.class == name)
    }

    /// Whether the node has at least one device of a class
    pub fn has_class(&self, class: &Class) -> bool {
        self.devices_for_class(class).next().is_some()
    }

    /// Returns an error if any data is missing from the node
    pub fn verify(&self) -> Result<()> {
        if self.metadata.id.is_empty() {
            return Err(Error::InvalidTopology(format!(
                "node {:?} missing instance metadata id",
                self.name
            )));
        }
        for pool in self.pools.values() {
            pool.verify().map_err(|e| node_context(self.id(), e))?;
        }
        for device in &self.devices {
            device.verify().map_err(|e| node_context(self.id(), e))?;
        }
        Ok(())
    }
}

fn node_context(node: &str, err: Error) -> Error {
    match err {
        Error::InvalidTopology(msg) => Error::InvalidTopology(format!("node {}: {}", node, msg)),
        other => other,
    }
}

impl std::fmt::Display for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N[{}|{}]: ", self.metadata.id, self.devices.len())?;
        for device in &self.devices {
            write!(f, "{}", device)?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, class: &str, size: u64, util: u32, pool: Option<&str>) -> Device {
        Device {
            id: id.into(),
            class: class.into(),
            size_gb: size,
            utilization: util,
            pool: pool.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn test_utilization_over_devices() {
        let mut node = StorageNode::new("i-1");
        node.devices = vec![
            device("d1", "c1", 8, 10, None),
            device("d2", "c1", 8, 21, None),
            device("d3", "c2", 8, 90, None),
        ];
        assert_eq!(node.utilization(&Class::named("c1")), 15);
        assert_eq!(node.utilization(&Class::named("c2")), 90);
        assert_eq!(node.utilization(&Class::named("c3")), 0);
        assert_eq!(node.total_storage(&Class::named("c1")), 16);
    }

    #[test]
    fn test_utilization_prefers_pools() {
        let mut node = StorageNode::new("i-1");
        node.devices = vec![
            device("d1", "c1", 8, 99, Some("p0")),
            device("d2", "c1", 8, 99, Some("p0")),
        ];
        node.pools.insert(
            "p0".into(),
            Pool {
                name: "p0".into(),
                set_size: 2,
                utilization: 40,
                class: "c1".into(),
                ..Default::default()
            },
        );
        assert_eq!(node.utilization(&Class::named("c1")), 40);
        // Device sizes are still counted directly
        assert_eq!(node.total_storage(&Class::named("c1")), 16);
    }

    #[test]
    fn test_pools_of_another_class_do_not_hide_devices() {
        let mut node = StorageNode::new("i-1");
        node.devices = vec![device("hot", "c1", 8, 90, None)];
        node.pools.insert(
            "p2".into(),
            Pool {
                name: "p2".into(),
                set_size: 1,
                utilization: 5,
                class: "c2".into(),
                ..Default::default()
            },
        );
        assert_eq!(node.raw_utilization(&Class::named("c1")), (90, 1));
        assert_eq!(node.utilization(&Class::named("c1")), 90);
        assert_eq!(node.utilization(&Class::named("c2")), 5);
    }

    #[test]
    fn test_set_size_for_class() {
        let mut node = StorageNode::new("i-1");
        let c1 = Class::named("c1");
        assert_eq!(node.set_size_for_class(&c1).0, 1);
        assert!(node.set_size_for_class(&c1).1.is_none());

        node.pools.insert(
            "replicated".into(),
            Pool {
                name: "replicated".into(),
                set_size: 3,
                class: "c1".into(),
                ..Default::default()
            },
        );
        let (n, pool) = node.set_size_for_class(&c1);
        assert_eq!(n, 3);
        assert_eq!(pool.map(|p| p.name.as_str()), Some("replicated"));
        assert_eq!(node.set_size_for_class(&Class::named("c2")).0, 1);
    }

    #[test]
    fn test_devices_on_pool() {
        let mut node = StorageNode::new("i-1");
        node.devices = vec![
            device("d1", "c1", 8, 1, Some("p0")),
            device("d2", "c1", 8, 1, Some("p1")),
            device("d3", "c1", 8, 1, None),
        ];
        let p0 = Pool {
            name: "p0".into(),
            set_size: 1,
            class: "c1".into(),
            ..Default::default()
        };
        let ids: Vec<_> = node.devices_on_pool(&p0).map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1"]);
    }

    #[test]
    fn test_verify_names_the_node() {
        let mut node = StorageNode::new("i-1");
        node.devices.push(device("", "c1", 8, 0, None));
        let err = node.verify().unwrap_err().to_string();
        assert!(err.contains("node i-1"));

        let node = StorageNode::default();
        assert!(node.verify().is_err());
    }

    #[test]
    fn test_display() {
        let mut node = StorageNode::new("i-1");
        node.devices.push(device("d1", "c1", 8, 5, None));
        assert_eq!(node.to_string(), "N[i-1|1]: D[c1|8Gi|5] \n");
    }
}
