//! In-memory storage provider
//!
//! Keeps a topology behind a lock and applies device membership changes to
//! it. Tests and the simulator drive utilization and node churn directly.

use super::StorageProvider;
use crate::config::Class;
use crate::error::{Error, Result};
use crate::topology::{Device, Pool, StorageNode, Topology};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Memory-only [`StorageProvider`]
#[derive(Debug, Default)]
pub struct FakeStorage {
    topology: RwLock<Topology>,

    // Fault injection
    fail_topology: AtomicBool,
    fail_adds: AtomicBool,
    fail_removes: AtomicBool,

    // Call counters
    topology_reads: AtomicU64,
    device_adds: AtomicU64,
    device_removes: AtomicU64,
}

impl FakeStorage {
    /// Create a fake storage system holding a topology
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: RwLock::new(topology),
            ..Default::default()
        }
    }

    /// Create a fake storage system with empty nodes
    pub fn with_nodes<I, S>(instance_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes = instance_ids.into_iter().map(StorageNode::new).collect();
        Self::new(Topology::new(nodes))
    }

    /// Snapshot of the current topology
    pub fn topology(&self) -> Topology {
        self.topology.read().clone()
    }

    // ===== Utilization =====

    /// Set every device and pool of a class on every node to a utilization
    pub fn set_utilization(&self, class: &Class, utilization: u32) {
        let mut topology = self.topology.write();
        for node in topology.nodes.iter_mut() {
            set_node_class_utilization(node, class, utilization);
        }
    }

    /// Set every device and pool of a class on one node to a utilization
    pub fn set_node_utilization(
        &self,
        instance_id: &str,
        class: &Class,
        utilization: u32,
    ) -> Result<()> {
        let mut topology = self.topology.write();
        let node = find_node_mut(&mut topology, instance_id, "set_node_utilization")?;
        set_node_class_utilization(node, class, utilization);
        Ok(())
    }

    // ===== Node churn =====

    /// Add a node to the cluster
    pub fn node_add(&self, node: StorageNode) -> Result<()> {
        let mut topology = self.topology.write();
        if topology.node(node.id()).is_some() {
            return Err(Error::storage(
                "node_add",
                format!("instance {} already exists", node.id()),
            ));
        }
        debug!(node = %node.id(), "Fake node added");
        topology.nodes.push(node);
        Ok(())
    }

    /// Remove a node and all its devices from the cluster
    pub fn node_delete(&self, instance_id: &str) -> Result<StorageNode> {
        let mut topology = self.topology.write();
        let index = topology
            .nodes
            .iter()
            .position(|n| n.id() == instance_id)
            .ok_or_else(|| {
                Error::storage("node_delete", format!("instance {} not found", instance_id))
            })?;
        debug!(node = %instance_id, "Fake node deleted");
        Ok(topology.nodes.remove(index))
    }

    /// Create a pool on a node
    pub fn pool_add(&self, instance_id: &str, pool: Pool) -> Result<()> {
        let mut topology = self.topology.write();
        let node = find_node_mut(&mut topology, instance_id, "pool_add")?;
        node.pools.insert(pool.name.clone(), pool);
        Ok(())
    }

    // ===== Fault injection =====

    /// Make topology reads fail
    pub fn set_fail_topology(&self, fail: bool) {
        self.fail_topology.store(fail, Ordering::SeqCst);
    }

    /// Make device additions fail
    pub fn set_fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    /// Make device removals fail
    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    // ===== Counters =====

    /// Number of topology reads
    pub fn topology_reads(&self) -> u64 {
        self.topology_reads.load(Ordering::SeqCst)
    }

    /// Number of successful device additions
    pub fn device_adds(&self) -> u64 {
        self.device_adds.load(Ordering::SeqCst)
    }

    /// Number of successful device removals
    pub fn device_removes(&self) -> u64 {
        self.device_removes.load(Ordering::SeqCst)
    }

    /// Number of successful membership changes of any kind
    pub fn mutations(&self) -> u64 {
        self.device_adds() + self.device_removes()
    }
}

fn find_node_mut<'a>(
    topology: &'a mut Topology,
    instance_id: &str,
    operation: &str,
) -> Result<&'a mut StorageNode> {
    topology
        .nodes
        .iter_mut()
        .find(|n| n.id() == instance_id)
        .ok_or_else(|| Error::storage(operation, format!("instance {} not found", instance_id)))
}

fn set_node_class_utilization(node: &mut StorageNode, class: &Class, utilization: u32) {
    for device in node.devices.iter_mut().filter(|d| d.class == class.name) {
        device.utilization = utilization;
    }
    for pool in node.pools.values_mut().filter(|p| p.class == class.name) {
        pool.utilization = utilization;
    }
}

#[async_trait]
impl StorageProvider for FakeStorage {
    async fn get_topology(&self) -> Result<Topology> {
        if self.fail_topology.load(Ordering::SeqCst) {
            return Err(Error::storage("get_topology", "injected failure"));
        }
        self.topology_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.topology())
    }

    async fn device_add(
        &self,
        node: &StorageNode,
        pool: Option<&Pool>,
        mut devices: Vec<Device>,
    ) -> Result<()> {
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(Error::storage("device_add", "injected failure"));
        }

        let mut topology = self.topology.write();
        let target = find_node_mut(&mut topology, node.id(), "device_add")?;

        if let Some(pool) = pool {
            if !target.pools.contains_key(&pool.name) {
                return Err(Error::storage(
                    "device_add",
                    format!("pool {} not found on instance {}", pool.name, node.id()),
                ));
            }
            for device in devices.iter_mut() {
                device.pool.get_or_insert_with(|| pool.name.clone());
            }
        }

        debug!(node = %node.id(), count = devices.len(), "Fake devices added");
        target.devices.append(&mut devices);
        self.device_adds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn device_remove(
        &self,
        node: &StorageNode,
        _pool: Option<&Pool>,
        device: &Device,
    ) -> Result<Vec<Device>> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Error::storage("device_remove", "injected failure"));
        }

        let mut topology = self.topology.write();
        let target = find_node_mut(&mut topology, node.id(), "device_remove")?;
        let index = target
            .devices
            .iter()
            .position(|d| d.id == device.id)
            .ok_or_else(|| {
                Error::storage(
                    "device_remove",
                    format!("device {} not found on instance {}", device.id, node.id()),
                )
            })?;

        let removed = target.devices.remove(index);
        debug!(node = %node.id(), device = %removed.id, "Fake device removed");
        self.device_removes.fetch_add(1, Ordering::SeqCst);
        Ok(vec![removed])
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn device(id: &str, class: &str) -> Device {
        Device {
            id: id.into(),
            class: class.into(),
            size_gb: 8,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_device_add_and_remove() {
        let storage = FakeStorage::with_nodes(["one", "two"]);
        let topology = storage.get_topology().await.unwrap();
        let two = &topology.nodes[1];

        storage
            .device_add(two, None, vec![device("d1", "c1"), device("d2", "c1")])
            .await
            .unwrap();
        assert_eq!(storage.topology().num_devices(), 2);
        assert_eq!(storage.topology().nodes[1].devices.len(), 2);

        let removed = storage
            .device_remove(two, None, &device("d1", "c1"))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "d1");
        assert_eq!(storage.topology().nodes[1].devices[0].id, "d2");
        assert_eq!(storage.mutations(), 2);
    }

    #[tokio::test]
    async fn test_device_add_into_pool() {
        let storage = FakeStorage::with_nodes(["one"]);
        let pool = Pool {
            name: "p0".into(),
            set_size: 2,
            class: "c1".into(),
            ..Default::default()
        };
        let node = storage.topology().nodes[0].clone();

        assert!(storage
            .device_add(&node, Some(&pool), vec![device("d1", "c1")])
            .await
            .is_err());

        storage.pool_add("one", pool.clone()).unwrap();
        storage
            .device_add(&node, Some(&pool), vec![device("d1", "c1")])
            .await
            .unwrap();
        assert_eq!(
            storage.topology().nodes[0].devices[0].pool.as_deref(),
            Some("p0")
        );
    }

    #[tokio::test]
    async fn test_unknown_node_and_device() {
        let storage = FakeStorage::with_nodes(["one"]);
        let ghost = StorageNode::new("ghost");
        assert_matches!(
            storage.device_add(&ghost, None, vec![]).await,
            Err(Error::StorageProvider { .. })
        );

        let one = storage.topology().nodes[0].clone();
        assert!(storage.device_remove(&one, None, &device("x", "c1")).await.is_err());
        assert_eq!(storage.mutations(), 0);
    }

    #[tokio::test]
    async fn test_utilization_helpers() {
        let storage = FakeStorage::with_nodes(["one", "two"]);
        let c1 = Class::named("c1");
        for node in storage.topology().nodes {
            storage
                .device_add(&node, None, vec![device(&format!("{}-d", node.id()), "c1")])
                .await
                .unwrap();
        }

        storage.set_utilization(&c1, 80);
        assert_eq!(storage.topology().utilization(&c1), 80);

        storage.set_node_utilization("two", &c1, 20).unwrap();
        assert_eq!(storage.topology().utilization(&c1), 50);
        assert!(storage.set_node_utilization("three", &c1, 1).is_err());
    }

    #[tokio::test]
    async fn test_node_churn_and_faults() {
        let storage = FakeStorage::with_nodes(["one"]);
        storage.node_add(StorageNode::new("two")).unwrap();
        assert!(storage.node_add(StorageNode::new("two")).is_err());
        assert_eq!(storage.node_delete("one").unwrap().id(), "one");
        assert!(storage.node_delete("one").is_err());
        assert_eq!(storage.topology().nodes.len(), 1);

        storage.set_fail_topology(true);
        assert!(storage.get_topology().await.is_err());
        storage.set_fail_topology(false);
        assert!(storage.get_topology().await.is_ok());
        assert_eq!(storage.topology_reads(), 1);
    }
}
