//! Error types for the Storage Autoscaler
//!
//! Provides structured error types for all autoscaler components including
//! topology validation, allocation, cloud provisioning and the storage
//! provider boundary.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the autoscaler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Topology Errors
    // =========================================================================
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("No storage nodes in the cluster")]
    NoStorageNodes,

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Manager already running")]
    AlreadyRunning,

    // =========================================================================
    // Cloud Provisioning Errors
    // =========================================================================
    #[error("Cloud operation failed: {operation} {resource}: {reason}")]
    CloudOperation {
        operation: String,
        resource: String,
        reason: String,
    },

    #[error("{resource} did not transition to {desired} within {timeout:?}, current state {actual}")]
    StateTimeout {
        resource: String,
        desired: String,
        actual: String,
        timeout: Duration,
    },

    #[error("Expected one {kind} for {id}, got {count}")]
    UnexpectedCardinality {
        kind: String,
        id: String,
        count: usize,
    },

    #[error("No free device slot on instance {instance_id}")]
    NoFreeDeviceSlot { instance_id: String },

    #[error("Bad device name {name:?} on instance {instance_id}")]
    BadDeviceName { instance_id: String, name: String },

    #[error("Volume {volume_id} is attached to {attached_to}, not {instance_id}")]
    AttachedElsewhere {
        volume_id: String,
        attached_to: String,
        instance_id: String,
    },

    // =========================================================================
    // Storage Provider Errors
    // =========================================================================
    #[error("Storage provider {operation} failed: {reason}")]
    StorageProvider { operation: String, reason: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("Class {class}: {source}")]
    ClassFailed {
        class: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to add disk set for class {class} on node {node} ({} orphaned volumes: {created:?}): {source}", created.len())]
    PartialBatch {
        node: String,
        class: String,
        created: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to delete device {device} from node {node}: {source}")]
    DeviceRemoval {
        node: String,
        device: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error after a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Wrapped errors take the action of their cause
            Error::ClassFailed { source, .. }
            | Error::PartialBatch { source, .. }
            | Error::DeviceRemoval { source, .. } => source.action(),

            // Transient errors - retry with backoff
            Error::CloudOperation { .. }
            | Error::StorageProvider { .. }
            | Error::UnexpectedCardinality { .. } => ErrorAction::RequeueWithBackoff,

            // The cloud is slow - give it time to settle
            Error::StateTimeout { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Capacity issues on the instance - medium retry
            Error::NoFreeDeviceSlot { .. } | Error::NoStorageNodes => {
                ErrorAction::RequeueAfter(Duration::from_secs(300))
            }

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::InvalidTopology(_)
            | Error::BadDeviceName { .. }
            | Error::AttachedElsewhere { .. }
            | Error::AlreadyRunning
            | Error::Yaml(_)
            | Error::JsonParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ClassFailed { source, .. }
            | Error::PartialBatch { source, .. }
            | Error::DeviceRemoval { source, .. } => source.is_transient(),
            Error::CloudOperation { .. }
            | Error::StorageProvider { .. }
            | Error::StateTimeout { .. } => true,
            _ => false,
        }
    }

    /// Shorthand for a failed cloud API call
    pub fn cloud(
        operation: impl Into<String>,
        resource: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::CloudOperation {
            operation: operation.into(),
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a failed storage provider call
    pub fn storage(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::StorageProvider {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the autoscaler
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::StateTimeout {
            resource: "vol-1".into(),
            desired: "available".into(),
            actual: "creating".into(),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::NoFreeDeviceSlot {
            instance_id: "i-1".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::cloud("create", "vol-1", "throttled");
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::InvalidTopology("node missing id".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }

    #[test]
    fn test_wrapped_errors_follow_source() {
        let err = Error::ClassFailed {
            class: "gp2".into(),
            source: Box::new(Error::storage("device_add", "rejected")),
        };
        assert!(err.is_transient());
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
        assert!(err.to_string().starts_with("Class gp2:"));

        let err = Error::PartialBatch {
            node: "i-1".into(),
            class: "gp2".into(),
            created: vec!["vol-1".into(), "vol-2".into()],
            source: Box::new(Error::NoFreeDeviceSlot {
                instance_id: "i-1".into(),
            }),
        };
        assert!(err.to_string().contains("2 orphaned volumes"));
        assert!(!err.is_transient());
    }
}
