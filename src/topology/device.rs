//! Devices and Pools
//!
//! The leaves of the topology graph as reported by the storage provider.

use super::ProviderCookie;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Device
// =============================================================================

/// A block device of the storage system, backed by one cloud volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Cloud volume id for this device
    pub id: String,
    /// Path of the block device node on the instance
    pub path: String,
    /// Class of device
    pub class: String,
    /// Pool name, if the device belongs to one
    #[serde(default)]
    pub pool: Option<String>,
    /// Size in GiB
    pub size_gb: u64,
    /// Utilization of the device as a percentage
    #[serde(default)]
    pub utilization: u32,
    /// Opaque handle owned by the storage provider
    #[serde(skip)]
    pub private: Option<ProviderCookie>,
}

impl Device {
    /// Returns an error if the device has any missing data
    pub fn verify(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidTopology(
                "device cloud id cannot be empty".into(),
            ));
        }
        if self.class.is_empty() {
            return Err(Error::InvalidTopology(format!(
                "device {} class cannot be empty",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether the device is a member of the named pool
    pub fn in_pool(&self, pool: &str) -> bool {
        self.pool.as_deref() == Some(pool)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "D[{}|{}Gi|{}] ", self.class, self.size_gb, self.utilization)
    }
}

// =============================================================================
// Pool
// =============================================================================

/// A node-local set of devices of one class, scaled in fixed increments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// Name or ID of the pool
    pub name: String,
    /// Number of disks added to or removed from the pool together
    pub set_size: usize,
    /// Utilization of the pool according to the storage system
    #[serde(default)]
    pub utilization: u32,
    /// Class of devices in the pool
    pub class: String,
    /// Opaque handle owned by the storage provider
    #[serde(skip)]
    pub private: Option<ProviderCookie>,
}

impl Pool {
    /// Returns an error if the pool has any missing data
    pub fn verify(&self) -> Result<()> {
        if self.set_size == 0 {
            return Err(Error::InvalidTopology(format!(
                "pool {} set size cannot be zero",
                self.name
            )));
        }
        if self.class.is_empty() {
            return Err(Error::InvalidTopology(format!(
                "pool {} class cannot be empty",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_verify() {
        let mut d = Device {
            id: "vol-1".into(),
            class: "gp2".into(),
            ..Default::default()
        };
        assert!(d.verify().is_ok());

        d.class.clear();
        assert!(d.verify().is_err());

        d.class = "gp2".into();
        d.id.clear();
        assert!(d.verify().is_err());
    }

    #[test]
    fn test_pool_verify() {
        let mut p = Pool {
            name: "p0".into(),
            set_size: 3,
            class: "gp2".into(),
            ..Default::default()
        };
        assert!(p.verify().is_ok());

        p.set_size = 0;
        assert!(p.verify().is_err());

        p.set_size = 1;
        p.class.clear();
        assert!(p.verify().is_err());
    }

    #[test]
    fn test_device_display() {
        let d = Device {
            id: "vol-1".into(),
            class: "gp2".into(),
            size_gb: 8,
            utilization: 42,
            ..Default::default()
        };
        assert_eq!(d.to_string(), "D[gp2|8Gi|42] ");
    }
}
