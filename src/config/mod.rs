//! Configuration Module
//!
//! The policy consumed by the manager: an ordered list of storage classes,
//! plus the runtime options of the reconciliation loop.

pub mod class;

pub use class::*;

use crate::allocator::AllocatorKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Config
// =============================================================================

/// All the classes of storage to manage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Classes of storage to manage, evaluated in order
    #[serde(default)]
    pub classes: Vec<Class>,
}

impl Config {
    /// Create a config from a list of classes
    pub fn new(classes: Vec<Class>) -> Self {
        Self { classes }
    }

    /// Parse a YAML document
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Parse a JSON document
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load and validate a config file. `.json` files are read as JSON,
    /// anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            _ => Self::from_yaml_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every class and the uniqueness of class names
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for class in &self.classes {
            class.validate()?;
            if !seen.insert(class.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate class name: {}",
                    class.name
                )));
            }
        }
        Ok(())
    }

    /// Find a class by name
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }
}

// =============================================================================
// Manager Options
// =============================================================================

/// Runtime options of the reconciliation manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Run a pass on this period while running, in addition to explicit triggers
    pub reconcile_interval: Option<Duration>,
    /// Strategy used to choose where to add and what to remove
    pub allocator: AllocatorKind,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            reconcile_interval: None,
            allocator: AllocatorKind::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
classes:
  - name: gp2
    watermarkHigh: 75
    watermarkLow: 25
    maximumTotalSize: 1024
    minimumTotalSize: 32
    diskSize: 8
    parameters:
      type: gp2
  - name: io1
    watermarkHigh: 60
    watermarkLow: 10
    maximumTotalSize: 20
    minimumTotalSize: 10
    diskSize: 1
"#;

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml_str(YAML).unwrap();
        assert_eq!(config.classes.len(), 2);
        assert_eq!(config.classes[0].name, "gp2");
        assert_eq!(config.classes[0].parameter("type"), Some("gp2"));
        assert_eq!(config.classes[1].disk_size_gb, 1);
        assert!(config.classes[1].parameters.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_yaml_and_json() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        yaml.write_all(YAML.as_bytes()).unwrap();
        let config = Config::from_file(yaml.path()).unwrap();
        assert_eq!(config.classes.len(), 2);

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json.write_all(serde_json::to_string(&config).unwrap().as_bytes())
            .unwrap();
        let reloaded = Config::from_file(json.path()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_duplicate_class_names_rejected() {
        let mut config = Config::from_yaml_str(YAML).unwrap();
        let dup = config.classes[0].clone();
        config.classes.push(dup);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_file_rejects_invalid_class() {
        let mut yaml = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        yaml.write_all(b"classes:\n  - name: bad\n    watermarkHigh: 10\n    watermarkLow: 20\n    maximumTotalSize: 1\n    minimumTotalSize: 0\n    diskSize: 1\n")
            .unwrap();
        assert!(Config::from_file(yaml.path()).is_err());
    }

    #[test]
    fn test_class_lookup() {
        let config = Config::from_yaml_str(YAML).unwrap();
        assert!(config.class("io1").is_some());
        assert!(config.class("st1").is_none());
    }
}
