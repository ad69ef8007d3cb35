//! Storage Autoscaler
//!
//! Keeps the utilization of every storage class within its watermarks by
//! provisioning cloud block volumes into a software-defined storage cluster
//! when it fills up, and handing them back when it drains.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        REST API (axum)                           │
//! │   lifecycle · reconcile · trigger · config · topology · metrics  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//!                    ┌────────────┴────────────┐
//!                    │   Reconciliation Loop   │
//!                    │  decide · add · remove  │
//!                    └──┬──────────┬────────┬──┘
//!                       │          │        │
//!          ┌────────────┴──┐  ┌────┴─────┐  ┌┴────────────────┐
//!          │ Cloud Provider│  │ Allocator│  │ Storage Provider│
//!          │ (block volumes│  │ (round   │  │ (topology,      │
//!          │  attach/wait) │  │  robin)  │  │  device add/rm) │
//!          └───────────────┘  └──────────┘  └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manager`]: Control loop and the per-class decision
//! - [`allocator`]: Placement of new disk sets and choice of removals
//! - [`cloud`]: Cloud provider port, block volume provider and fake
//! - [`storage`]: Storage provider port and fake
//! - [`topology`]: Cluster model of nodes, pools and devices
//! - [`config`]: Storage classes and runtime options
//! - [`api`]: REST API server
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod allocator;
pub mod api;
pub mod cloud;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod storage;
pub mod topology;

// Re-export commonly used types
pub use allocator::{Allocator, AllocatorKind, AllocatorRef, RemovalTarget, RoundRobinAllocator};

pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use cloud::{
    BlockVolumeConfig, BlockVolumeProvider, CloudDevice, CloudProvider, CloudProviderRef,
    FakeCloud, RetryPolicy, VolumeApi,
};

pub use config::{Class, Config, ManagerOptions};

pub use error::{Error, ErrorAction, Result};

pub use manager::{decide, ClassOutcome, Decision, Manager, ManagerState, PassReport};

pub use metrics::ReconcileMetrics;

pub use storage::{FakeStorage, StorageProvider, StorageProviderRef};

pub use topology::{Device, InstanceMetadata, Pool, ProviderCookie, StorageNode, Topology};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
