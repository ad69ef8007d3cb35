//! In-memory cloud provider
//!
//! Hands out sequential volume ids and keeps track of which volumes are live
//! on which instance. Used by the simulator binary and by tests.

use super::{CloudDevice, CloudProvider};
use crate::config::Class;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// A volume held by the fake cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeVolume {
    pub instance_id: String,
    pub class: String,
    pub size_gb: u64,
}

/// Memory-only [`CloudProvider`]
#[derive(Debug, Default)]
pub struct FakeCloud {
    volumes: DashMap<String, FakeVolume>,
    volume_counter: AtomicU64,
    creates: AtomicU64,
    deletes: AtomicU64,
    /// Creates left before injected failures start
    creates_before_failure: Mutex<Option<u64>>,
    fail_deletes: AtomicBool,
}

impl FakeCloud {
    /// Create an empty fake cloud
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_volume_id(&self) -> String {
        let counter = self.volume_counter.fetch_add(1, Ordering::SeqCst);
        format!("vol-{:016x}", counter)
    }

    /// Let `n` more creates succeed, then fail every create after that
    pub fn fail_creates_after(&self, n: u64) {
        *self.creates_before_failure.lock() = Some(n);
    }

    /// Make every delete fail or succeed
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        *self.creates_before_failure.lock() = None;
        self.set_fail_deletes(false);
    }

    /// Number of successful creates
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful deletes
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of live volumes
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Live volume by id
    pub fn volume(&self, id: &str) -> Option<FakeVolume> {
        self.volumes.get(id).map(|v| v.clone())
    }

    /// Ids of live volumes on an instance
    pub fn volumes_on(&self, instance_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .volumes
            .iter()
            .filter(|e| e.value().instance_id == instance_id)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn take_create_permit(&self) -> bool {
        let mut remaining = self.creates_before_failure.lock();
        match remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn device_create(&self, instance_id: &str, class: &Class) -> Result<CloudDevice> {
        if !self.take_create_permit() {
            return Err(Error::cloud("create_volume", instance_id, "injected failure"));
        }

        let id = self.generate_volume_id();
        self.volumes.insert(
            id.clone(),
            FakeVolume {
                instance_id: instance_id.to_string(),
                class: class.name.clone(),
                size_gb: class.disk_size_gb,
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        debug!(volume = %id, instance = %instance_id, class = %class.name, "Fake volume created");

        Ok(CloudDevice {
            path: format!("/dev/fake/{}", id),
            id,
            size_gb: class.disk_size_gb,
        })
    }

    async fn device_delete(&self, instance_id: &str, device_id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::cloud("delete_volume", device_id, "injected failure"));
        }
        // Devices seeded into the topology were never created here
        if let Some(owner) = self.volumes.get(device_id).map(|v| v.instance_id.clone()) {
            if owner != instance_id {
                return Err(Error::AttachedElsewhere {
                    volume_id: device_id.to_string(),
                    attached_to: owner,
                    instance_id: instance_id.to_string(),
                });
            }
            self.volumes.remove(device_id);
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        debug!(volume = %device_id, instance = %instance_id, "Fake volume deleted");
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
