//! Storage Class
//!
//! A named storage policy applied cluster-wide: utilization watermarks,
//! total size bounds and the size of each disk added or removed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of storage to manage for the cloud provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    /// Name of the class
    pub name: String,

    /// Parameters for this class, passed opaquely to the cloud provider
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Add storage if utilization is at or above this value
    pub watermark_high: u32,

    /// Remove storage if utilization is at or below this value
    pub watermark_low: u32,

    /// Maximum size in GiB of storage of this class on the cluster
    #[serde(rename = "maximumTotalSize")]
    pub maximum_total_size_gb: u64,

    /// Minimum size in GiB of storage of this class on the cluster
    #[serde(rename = "minimumTotalSize")]
    pub minimum_total_size_gb: u64,

    /// Size in GiB of each disk to add
    #[serde(rename = "diskSize")]
    pub disk_size_gb: u64,
}

impl Class {
    /// Create a class with the given name and no policy
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Check the class policy is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Configuration("class name cannot be empty".into()));
        }
        if self.watermark_high > 100 || self.watermark_low > 100 {
            return Err(Error::Configuration(format!(
                "class {}: watermarks must be between 0 and 100",
                self.name
            )));
        }
        if self.watermark_high <= self.watermark_low {
            return Err(Error::Configuration(format!(
                "class {}: watermarkHigh ({}) must be greater than watermarkLow ({})",
                self.name, self.watermark_high, self.watermark_low
            )));
        }
        if self.minimum_total_size_gb > self.maximum_total_size_gb {
            return Err(Error::Configuration(format!(
                "class {}: minimumTotalSize ({}) exceeds maximumTotalSize ({})",
                self.name, self.minimum_total_size_gb, self.maximum_total_size_gb
            )));
        }
        if self.disk_size_gb == 0 {
            return Err(Error::Configuration(format!(
                "class {}: diskSize cannot be zero",
                self.name
            )));
        }
        Ok(())
    }

    /// Get a parameter by key
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: Max:{} Min:{} Size:{} WH:{} WL:{} Params:{:?}",
            self.name,
            self.maximum_total_size_gb,
            self.minimum_total_size_gb,
            self.disk_size_gb,
            self.watermark_high,
            self.watermark_low,
            self.parameters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gp2() -> Class {
        Class {
            name: "gp2".into(),
            watermark_high: 75,
            watermark_low: 25,
            disk_size_gb: 8,
            maximum_total_size_gb: 1024,
            minimum_total_size_gb: 32,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_accepts_sane_class() {
        assert!(gp2().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let mut c = gp2();
        c.watermark_low = 80;
        assert!(c.validate().is_err());

        let mut c = gp2();
        c.watermark_high = 101;
        assert!(c.validate().is_err());

        let mut c = gp2();
        c.minimum_total_size_gb = 2048;
        assert!(c.validate().is_err());

        let mut c = gp2();
        c.disk_size_gb = 0;
        assert!(c.validate().is_err());

        assert!(Class::named("").validate().is_err());
    }

    #[test]
    fn test_serde_field_names() {
        let json = serde_json::to_value(gp2()).unwrap();
        assert_eq!(json["watermarkHigh"], 75);
        assert_eq!(json["maximumTotalSize"], 1024);
        assert_eq!(json["minimumTotalSize"], 32);
        assert_eq!(json["diskSize"], 8);
    }

    #[test]
    fn test_display() {
        let s = gp2().to_string();
        assert!(s.starts_with("gp2: Max:1024 Min:32 Size:8 WH:75 WL:25"));
    }
}
