//! Cloud Provider Module
//!
//! The boundary to the infrastructure that owns block volumes. The manager
//! only sees [`CloudProvider`]; [`BlockVolumeProvider`] implements the
//! create/attach/detach/delete protocol on top of a raw [`VolumeApi`].

pub mod block;
pub mod fake;
pub mod retry;

pub use block::*;
pub use fake::FakeCloud;
pub use retry::{poll_until, OnError, Poll, RetryPolicy};

use crate::config::Class;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A cloud block device attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDevice {
    /// Cloud volume id
    pub id: String,
    /// Path of the device on the instance
    pub path: String,
    /// Size in GiB
    pub size_gb: u64,
}

/// Port for cloud block device operations
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create a device of a class and attach it to an instance
    async fn device_create(&self, instance_id: &str, class: &Class) -> Result<CloudDevice>;

    /// Detach a device from an instance, then delete it
    async fn device_delete(&self, instance_id: &str, device_id: &str) -> Result<()>;

    /// Provider name
    fn name(&self) -> &str;
}

/// Shared cloud provider handle
pub type CloudProviderRef = Arc<dyn CloudProvider>;
