//! Storage Provider Module
//!
//! The boundary to the storage system that consumes the devices. It reports
//! the topology and accepts or rejects membership changes.

pub mod fake;

pub use fake::FakeStorage;

use crate::error::Result;
use crate::topology::{Device, Pool, StorageNode, Topology};
use async_trait::async_trait;
use std::sync::Arc;

/// Port for the storage system. Implementations serialize concurrent
/// mutations themselves.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Current topology of the storage system
    async fn get_topology(&self) -> Result<Topology>;

    /// Add devices to a node, into a pool when one is given
    async fn device_add(
        &self,
        node: &StorageNode,
        pool: Option<&Pool>,
        devices: Vec<Device>,
    ) -> Result<()>;

    /// Take a device out of a node. Returns the cloud devices to detach and
    /// delete, which may be more than the one asked for.
    async fn device_remove(
        &self,
        node: &StorageNode,
        pool: Option<&Pool>,
        device: &Device,
    ) -> Result<Vec<Device>>;

    /// Provider name
    fn name(&self) -> &str;
}

/// Shared storage provider handle
pub type StorageProviderRef = Arc<dyn StorageProvider>;
