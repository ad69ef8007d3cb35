//! Reconciliation Manager
//!
//! Owns the control loop. Each pass fetches the topology once, verifies it,
//! then walks the configured classes in order and adds one disk set or
//! removes one device per class as [`decide`] says.
//!
//! ```text
//!            start()                      stop()
//!  Stopped ───────────► Running ──────────────────► Stopped
//!                          │
//!                          ▼ trigger() / interval tick
//!                     reconcile()  (single flight)
//! ```

pub mod decision;
pub mod report;

pub use decision::*;
pub use report::*;

use crate::allocator::AllocatorRef;
use crate::cloud::CloudProviderRef;
use crate::config::{Class, Config, ManagerOptions};
use crate::error::{Error, Result};
use crate::metrics::ReconcileMetrics;
use crate::storage::StorageProviderRef;
use crate::topology::{Device, Topology};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Stopped,
    Running,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerState::Stopped => write!(f, "stopped"),
            ManagerState::Running => write!(f, "running"),
        }
    }
}

/// State and the handles of the running loop
struct Lifecycle {
    state: ManagerState,
    cancel: Option<CancellationToken>,
    trigger: Option<mpsc::Sender<()>>,
}

// =============================================================================
// Manager
// =============================================================================

/// Storage capacity reconciliation manager
pub struct Manager {
    config: RwLock<Config>,
    options: ManagerOptions,
    cloud: CloudProviderRef,
    storage: StorageProviderRef,
    allocator: AllocatorRef,
    metrics: ReconcileMetrics,
    /// Guards only the state and the loop handles, never held across I/O
    lifecycle: Mutex<Lifecycle>,
    /// One pass at a time, whoever asks for it
    pass_lock: tokio::sync::Mutex<()>,
    last_report: RwLock<Option<PassReport>>,
}

impl Manager {
    /// Create a stopped manager with default options
    pub fn new(
        config: Config,
        cloud: CloudProviderRef,
        storage: StorageProviderRef,
    ) -> Result<Arc<Self>> {
        Self::with_options(config, cloud, storage, ManagerOptions::default())
    }

    /// Create a stopped manager
    pub fn with_options(
        config: Config,
        cloud: CloudProviderRef,
        storage: StorageProviderRef,
        options: ManagerOptions,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let allocator = options.allocator.build();

        info!(
            classes = config.classes.len(),
            cloud = %cloud.name(),
            storage = %storage.name(),
            allocator = %allocator.name(),
            "Manager created"
        );

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            options,
            cloud,
            storage,
            allocator,
            metrics: ReconcileMetrics::new()?,
            lifecycle: Mutex::new(Lifecycle {
                state: ManagerState::Stopped,
                cancel: None,
                trigger: None,
            }),
            pass_lock: tokio::sync::Mutex::new(()),
            last_report: RwLock::new(None),
        }))
    }

    // ===== Lifecycle =====

    /// Start the control loop. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ManagerState::Running {
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let (trigger, requests) = mpsc::channel(1);
        tokio::spawn(run_loop(
            Arc::downgrade(self),
            cancel.clone(),
            requests,
            self.options.reconcile_interval.map(ticker),
        ));

        lifecycle.state = ManagerState::Running;
        lifecycle.cancel = Some(cancel);
        lifecycle.trigger = Some(trigger);
        info!(interval = ?self.options.reconcile_interval, "Manager started");
        Ok(())
    }

    /// Stop the control loop. A pass in flight runs to completion.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ManagerState::Stopped {
            return;
        }
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        lifecycle.trigger = None;
        lifecycle.state = ManagerState::Stopped;
        info!("Manager stopped");
    }

    /// Current lifecycle state
    pub fn state(&self) -> ManagerState {
        self.lifecycle.lock().state
    }

    /// Whether the control loop is running
    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    /// Ask the running loop for a pass. Requests made while one is already
    /// pending are merged into it. Returns false if the manager is stopped.
    pub fn trigger(&self) -> bool {
        let lifecycle = self.lifecycle.lock();
        match &lifecycle.trigger {
            Some(trigger) => {
                if trigger.try_send(()).is_err() {
                    debug!("Pass already pending");
                }
                true
            }
            None => false,
        }
    }

    // ===== Configuration =====

    /// Replace the configuration used by the next pass
    pub fn set_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        info!(classes = config.classes.len(), "Configuration updated");
        *self.config.write() = config;
        Ok(())
    }

    /// Current configuration
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Runtime options
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    // ===== Observation =====

    /// Report of the last completed pass
    pub fn last_report(&self) -> Option<PassReport> {
        self.last_report.read().clone()
    }

    /// Reconciliation metrics
    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Current topology, straight from the storage provider
    pub async fn topology(&self) -> Result<Topology> {
        self.storage.get_topology().await
    }

    // ===== Reconciliation =====

    /// Run one pass now and return its error, if any
    pub async fn reconcile(&self) -> Result<()> {
        let _pass = self.pass_lock.lock().await;

        let started_at = Utc::now();
        let start = Instant::now();
        let config = self.config();

        let mut outcomes = Vec::with_capacity(config.classes.len());
        let result = self.run_pass(&config, &mut outcomes).await;

        let report = PassReport {
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            classes: outcomes,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        debug!(
            duration_ms = report.duration_ms,
            added = report.devices_added(),
            removed = report.devices_removed(),
            "Pass complete"
        );
        self.metrics.observe_pass(&report);
        *self.last_report.write() = Some(report);

        result
    }

    async fn run_pass(&self, config: &Config, outcomes: &mut Vec<ClassOutcome>) -> Result<()> {
        let topology = self.storage.get_topology().await?;
        topology.verify()?;

        let mut first_error: Option<Error> = None;
        for class in &config.classes {
            let utilization = topology.utilization(class);
            let total = topology.total_storage(class);
            let decision = decide(class, utilization, total);
            info!(
                class = %class.name,
                utilization,
                total_gb = total,
                decision = %decision,
                "Evaluated class"
            );

            let mut outcome = ClassOutcome::new(&class.name, utilization, total, decision);
            let result = match decision {
                Decision::Add => {
                    let (added, result) = self.add_storage(&topology, class).await;
                    outcome.devices_added = added;
                    result
                }
                Decision::Remove => {
                    let (removed, result) = self.remove_storage(&topology, class).await;
                    outcome.devices_removed = removed;
                    result
                }
                Decision::NoChange => Ok(()),
            };

            if let Err(e) = result {
                error!(class = %class.name, error = %e, "Class reconciliation failed");
                outcome.error = Some(e.to_string());
                if first_error.is_none() {
                    first_error = Some(Error::ClassFailed {
                        class: class.name.clone(),
                        source: Box::new(e),
                    });
                }
            }
            outcomes.push(outcome);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Add one disk set of a class. Returns how many devices the storage
    /// system accepted.
    async fn add_storage(&self, topology: &Topology, class: &Class) -> (usize, Result<()>) {
        let node = match self.allocator.determine_node_to_add_storage(topology, class) {
            Ok(node) => node,
            Err(e) => return (0, Err(e)),
        };
        let (set_size, pool) = node.set_size_for_class(class);
        info!(
            class = %class.name,
            node = %node.id(),
            pool = ?pool.map(|p| p.name.as_str()),
            set_size,
            "Adding storage"
        );

        let mut devices: Vec<Device> = Vec::with_capacity(set_size);
        for _ in 0..set_size {
            match self.cloud.device_create(node.id(), class).await {
                Ok(created) => {
                    debug!(class = %class.name, node = %node.id(), device = %created.id, "Device created");
                    devices.push(Device {
                        id: created.id,
                        path: created.path,
                        class: class.name.clone(),
                        pool: pool.map(|p| p.name.clone()),
                        size_gb: created.size_gb,
                        utilization: 0,
                        private: None,
                    });
                }
                Err(e) if devices.is_empty() => return (0, Err(e)),
                Err(e) => return (0, Err(partial_batch(node.id(), class, &devices, e))),
            }
        }

        let count = devices.len();
        let created: Vec<Device> = devices.clone();
        if let Err(e) = self.storage.device_add(node, pool, devices).await {
            return (0, Err(partial_batch(node.id(), class, &created, e)));
        }

        info!(class = %class.name, node = %node.id(), count, "Storage added");
        (count, Ok(()))
    }

    /// Remove one device of a class. Every cloud device handed back by the
    /// storage system is deleted; failures do not stop the others and the
    /// last one is returned. Returns how many cloud deletes succeeded.
    async fn remove_storage(&self, topology: &Topology, class: &Class) -> (usize, Result<()>) {
        let target = match self.allocator.determine_storage_to_remove(topology, class) {
            Some(target) => target,
            None => {
                debug!(class = %class.name, "No storage to remove");
                return (0, Ok(()));
            }
        };
        let device = match target.device {
            Some(device) => device,
            None => {
                debug!(class = %class.name, node = %target.node.id(), "No device to remove");
                return (0, Ok(()));
            }
        };

        info!(
            class = %class.name,
            node = %target.node.id(),
            pool = ?target.pool.map(|p| p.name.as_str()),
            device = %device.id,
            "Removing storage"
        );
        let removed = match self
            .storage
            .device_remove(target.node, target.pool, device)
            .await
        {
            Ok(removed) => removed,
            Err(e) => return (0, Err(e)),
        };

        let mut deleted = 0;
        let mut last_error = None;
        for d in &removed {
            match self.cloud.device_delete(target.node.id(), &d.id).await {
                Ok(()) => {
                    deleted += 1;
                    info!(class = %class.name, node = %target.node.id(), device = %d.id, "Device deleted");
                }
                Err(e) => {
                    error!(node = %target.node.id(), device = %d.id, error = %e, "Failed to delete device");
                    last_error = Some(Error::DeviceRemoval {
                        node: target.node.id().to_string(),
                        device: d.id.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        let result = match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        };
        (deleted, result)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("state", &self.state())
            .field("options", &self.options)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

fn partial_batch(node: &str, class: &Class, created: &[Device], source: Error) -> Error {
    let created: Vec<String> = created.iter().map(|d| d.id.clone()).collect();
    error!(
        class = %class.name,
        node = %node,
        orphaned = ?created,
        error = %source,
        "Disk set only partially added, created volumes are orphaned"
    );
    Error::PartialBatch {
        node: node.to_string(),
        class: class.name.clone(),
        created,
        source: Box::new(source),
    }
}

// =============================================================================
// Control Loop
// =============================================================================

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Waits for a trigger or tick and runs a pass, until cancelled or the
/// manager is dropped
async fn run_loop(
    manager: Weak<Manager>,
    cancel: CancellationToken,
    mut requests: mpsc::Receiver<()>,
    mut interval: Option<Interval>,
) {
    debug!("Control loop started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
            }
            _ = tick(&mut interval) => {}
        }

        let Some(strong) = manager.upgrade() else {
            break;
        };
        if let Err(e) = strong.reconcile().await {
            if e.is_retryable() {
                warn!(error = %e, action = ?e.action(), "Reconciliation pass failed");
            } else {
                error!(error = %e, "Reconciliation pass failed");
            }
        }
    }
    debug!("Control loop exited");
}
