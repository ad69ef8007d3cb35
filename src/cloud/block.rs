//! Block Volume Provider
//!
//! Implements device creation and deletion for clouds exposing EC2-style
//! block volumes:
//!
//! ```text
//! create:  describe instance ─► create volume ─► wait available ─► tag
//!                                                   │ fail: delete volume
//!          [attach lock] describe instance ─► pick free name ─► attach
//!                        ─► wait attached ─► resolve guest path
//!                                                   │ fail: delete volume
//! delete:  detach ─► wait detached ─► delete volume
//! ```
//!
//! The raw API sits behind [`VolumeApi`] so a vendor SDK can be plugged in
//! without the protocol knowing about it.

use super::retry::{poll_until, OnError, Poll, RetryPolicy};
use super::{CloudDevice, CloudProvider};
use crate::config::Class;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Device letters usable for data volumes
const DEVICE_LETTERS: &[u8] = b"fghijklmnop";

/// Default volume type when the class does not name one
pub const DEFAULT_VOLUME_TYPE: &str = "gp2";

// =============================================================================
// API Records
// =============================================================================

/// Lifecycle state of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolumeState::Creating => "creating",
            VolumeState::Available => "available",
            VolumeState::InUse => "in-use",
            VolumeState::Deleting => "deleting",
            VolumeState::Deleted => "deleted",
            VolumeState::Error => "error",
        };
        f.write_str(s)
    }
}

/// State of a volume attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Attaching,
    Attached,
    Detaching,
    Detached,
    Busy,
}

impl std::fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttachmentState::Attaching => "attaching",
            AttachmentState::Attached => "attached",
            AttachmentState::Detaching => "detaching",
            AttachmentState::Detached => "detached",
            AttachmentState::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// Attachment of a volume to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub volume_id: String,
    pub instance_id: String,
    /// Device name requested at attach time, e.g. `/dev/sdf`
    pub device: Option<String>,
    pub state: AttachmentState,
}

/// A block volume as described by the cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    pub id: String,
    pub size_gb: u64,
    pub volume_type: String,
    pub availability_zone: String,
    pub state: VolumeState,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A device name in use on an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub volume_id: Option<String>,
}

/// An instance as described by the cloud
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub id: String,
    pub availability_zone: String,
    pub root_device_name: String,
    #[serde(default)]
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

/// Parameters of a new volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    pub availability_zone: String,
    pub size_gb: u64,
    pub volume_type: String,
    /// Provisioned IOPS, only sent for `io1` volumes
    pub iops: Option<u64>,
    pub encrypted: bool,
}

// =============================================================================
// Volume API Port
// =============================================================================

/// Raw block volume API of a cloud
#[async_trait]
pub trait VolumeApi: Send + Sync {
    /// Describe instances matching an id
    async fn describe_instances(&self, instance_id: &str) -> Result<Vec<InstanceRecord>>;

    /// Start creating a volume
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<VolumeRecord>;

    /// Describe volumes matching an id
    async fn describe_volumes(&self, volume_id: &str) -> Result<Vec<VolumeRecord>>;

    /// Apply tags to a volume
    async fn create_tags(&self, volume_id: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    /// Delete a volume
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    /// Start attaching a volume to an instance under a device name
    async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> Result<()>;

    /// Start detaching a volume from an instance
    async fn detach_volume(&self, volume_id: &str, instance_id: &str, force: bool) -> Result<()>;
}

// =============================================================================
// Provider
// =============================================================================

/// Configuration of the block volume provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockVolumeConfig {
    /// Wait for a new volume to become available
    pub volume_wait: RetryPolicy,
    /// Wait for an attach or detach to complete
    pub attachment_wait: RetryPolicy,
    /// Tags applied to every volume created
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Default for BlockVolumeConfig {
    fn default() -> Self {
        Self {
            volume_wait: RetryPolicy::default(),
            attachment_wait: RetryPolicy::default(),
            tags: BTreeMap::new(),
        }
    }
}

/// [`CloudProvider`] over a block volume API
pub struct BlockVolumeProvider<A> {
    api: A,
    config: BlockVolumeConfig,
    /// Serializes device name selection and attach per provider
    attach_lock: Mutex<()>,
}

impl<A: VolumeApi> BlockVolumeProvider<A> {
    /// Create a provider over an API client
    pub fn new(api: A, config: BlockVolumeConfig) -> Self {
        Self {
            api,
            config,
            attach_lock: Mutex::new(()),
        }
    }

    /// Underlying API client
    pub fn api(&self) -> &A {
        &self.api
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceRecord> {
        let mut instances = self.api.describe_instances(instance_id).await?;
        if instances.len() != 1 {
            return Err(Error::UnexpectedCardinality {
                kind: "instance".into(),
                id: instance_id.into(),
                count: instances.len(),
            });
        }
        Ok(instances.remove(0))
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<VolumeRecord> {
        let mut volumes = self.api.describe_volumes(volume_id).await?;
        if volumes.len() != 1 {
            return Err(Error::UnexpectedCardinality {
                kind: "volume".into(),
                id: volume_id.into(),
                count: volumes.len(),
            });
        }
        Ok(volumes.remove(0))
    }

    /// Wait for a volume state. Failed describes are retried until the deadline.
    async fn wait_volume_state(&self, volume_id: &str, desired: VolumeState) -> Result<VolumeRecord> {
        let desired_name = desired.to_string();
        poll_until(
            self.config.volume_wait,
            volume_id,
            &desired_name,
            OnError::Retry,
            || async move {
                let volume = self.describe_volume(volume_id).await?;
                if volume.state == desired {
                    Ok(Poll::Ready(volume))
                } else {
                    Ok(Poll::Pending(volume.state.to_string()))
                }
            },
        )
        .await
    }

    /// Wait for the attachment state of a volume. A volume without any
    /// attachment counts as detached. Failed describes are fatal.
    async fn wait_attachment_state(
        &self,
        volume_id: &str,
        desired: AttachmentState,
    ) -> Result<VolumeRecord> {
        let desired_name = desired.to_string();
        poll_until(
            self.config.attachment_wait,
            volume_id,
            &desired_name,
            OnError::Fail,
            || async move {
                let volume = self.describe_volume(volume_id).await?;
                let actual = volume
                    .attachments
                    .first()
                    .map(|a| a.state)
                    .unwrap_or(AttachmentState::Detached);
                if actual == desired {
                    Ok(Poll::Ready(volume))
                } else {
                    Ok(Poll::Pending(actual.to_string()))
                }
            },
        )
        .await
    }

    /// Delete a volume that could not be brought into service
    async fn rollback_create(&self, volume_id: &str) {
        if let Err(e) = self.api.delete_volume(volume_id).await {
            warn!(volume = %volume_id, error = %e, "Rollback failed to delete volume");
        } else {
            info!(volume = %volume_id, "Rolled back volume");
        }
    }

    /// Attach a volume on the first free device name and return its path
    async fn attach(&self, instance_id: &str, volume_id: &str) -> Result<String> {
        let _guard = self.attach_lock.lock().await;

        let instance = self.describe_instance(instance_id).await?;
        let devices = free_devices(&instance)?;
        let device = &devices[0];

        debug!(volume = %volume_id, instance = %instance_id, device = %device, "Attaching volume");
        self.api.attach_volume(volume_id, instance_id, device).await?;

        let volume = self
            .wait_attachment_state(volume_id, AttachmentState::Attached)
            .await?;
        device_path(&volume, instance_id)
    }

    /// Volume request for a class in a zone
    pub fn volume_request(availability_zone: &str, class: &Class) -> Result<CreateVolumeRequest> {
        let volume_type = class.parameter("type").unwrap_or(DEFAULT_VOLUME_TYPE);

        let iops = match (volume_type, class.parameter("iops")) {
            ("io1", Some(v)) => Some(v.parse::<u64>().map_err(|e| {
                Error::Configuration(format!("class {}: bad iops {:?}: {}", class.name, v, e))
            })?),
            _ => None,
        };

        let encrypted = match class.parameter("encrypted") {
            Some(v) => v.parse::<bool>().map_err(|e| {
                Error::Configuration(format!("class {}: bad encrypted {:?}: {}", class.name, v, e))
            })?,
            None => false,
        };

        Ok(CreateVolumeRequest {
            availability_zone: availability_zone.to_string(),
            size_gb: class.disk_size_gb,
            volume_type: volume_type.to_string(),
            iops,
            encrypted,
        })
    }
}

#[async_trait]
impl<A: VolumeApi> CloudProvider for BlockVolumeProvider<A> {
    async fn device_create(&self, instance_id: &str, class: &Class) -> Result<CloudDevice> {
        let instance = self.describe_instance(instance_id).await?;
        let request = Self::volume_request(&instance.availability_zone, class)?;

        let volume = self.api.create_volume(&request).await?;
        info!(
            volume = %volume.id,
            instance = %instance_id,
            class = %class.name,
            size_gb = request.size_gb,
            volume_type = %request.volume_type,
            "Created volume"
        );

        if let Err(e) = self.wait_volume_state(&volume.id, VolumeState::Available).await {
            self.rollback_create(&volume.id).await;
            return Err(e);
        }
        if !self.config.tags.is_empty() {
            if let Err(e) = self.api.create_tags(&volume.id, &self.config.tags).await {
                self.rollback_create(&volume.id).await;
                return Err(e);
            }
        }

        let path = match self.attach(instance_id, &volume.id).await {
            Ok(path) => path,
            Err(e) => {
                error!(volume = %volume.id, instance = %instance_id, error = %e, "Unable to attach volume");
                self.rollback_create(&volume.id).await;
                return Err(e);
            }
        };

        info!(volume = %volume.id, instance = %instance_id, path = %path, "Attached volume");
        Ok(CloudDevice {
            id: volume.id,
            path,
            size_gb: request.size_gb,
        })
    }

    async fn device_delete(&self, instance_id: &str, device_id: &str) -> Result<()> {
        self.api.detach_volume(device_id, instance_id, false).await?;
        self.wait_attachment_state(device_id, AttachmentState::Detached)
            .await?;
        self.api.delete_volume(device_id).await?;

        info!(volume = %device_id, instance = %instance_id, "Deleted volume");
        Ok(())
    }

    fn name(&self) -> &str {
        "block"
    }
}

// =============================================================================
// Device Names
// =============================================================================

/// Device names still free on an instance, in letter order.
///
/// The root device and two-letter names are ignored. Any other name that is
/// not `/dev/sdX` or `/dev/xvdX` is an error.
pub fn free_devices(instance: &InstanceRecord) -> Result<Vec<String>> {
    let mut free = [true; DEVICE_LETTERS.len()];

    for mapping in &instance.block_device_mappings {
        let name = mapping.device_name.as_str();
        if name == instance.root_device_name {
            continue;
        }

        let bad_name = || Error::BadDeviceName {
            instance_id: instance.id.clone(),
            name: name.to_string(),
        };
        let suffix = name
            .strip_prefix("/dev/sd")
            .or_else(|| name.strip_prefix("/dev/xvd"))
            .ok_or_else(bad_name)?;

        match suffix.as_bytes() {
            [letter] => {
                if let Some(i) = DEVICE_LETTERS.iter().position(|l| l == letter) {
                    free[i] = false;
                }
            }
            // Never used for data volumes
            [_, _] => continue,
            _ => return Err(bad_name()),
        }
    }

    let devices: Vec<String> = DEVICE_LETTERS
        .iter()
        .zip(free)
        .filter(|(_, free)| *free)
        .map(|(letter, _)| format!("/dev/sd{}", *letter as char))
        .collect();

    if devices.is_empty() {
        return Err(Error::NoFreeDeviceSlot {
            instance_id: instance.id.clone(),
        });
    }
    Ok(devices)
}

/// Path of an attached volume as seen from inside the instance.
///
/// `/dev/sdX` names are exposed by the guest as `/dev/xvdX`.
pub fn device_path(volume: &VolumeRecord, instance_id: &str) -> Result<String> {
    let attachment = volume
        .attachments
        .first()
        .ok_or_else(|| Error::cloud("device_path", &volume.id, "volume is detached"))?;

    if attachment.instance_id != instance_id {
        return Err(Error::AttachedElsewhere {
            volume_id: volume.id.clone(),
            attached_to: attachment.instance_id.clone(),
            instance_id: instance_id.to_string(),
        });
    }
    if attachment.state != AttachmentState::Attached {
        return Err(Error::cloud(
            "device_path",
            &volume.id,
            format!("invalid state {}, volume is not attached", attachment.state),
        ));
    }

    let device = attachment
        .device
        .as_deref()
        .ok_or_else(|| Error::cloud("device_path", &volume.id, "no attachment device name"))?;

    Ok(match device.strip_prefix("/dev/sd") {
        Some(rest) => format!("/dev/xvd{}", rest),
        None => device.to_string(),
    })
}
