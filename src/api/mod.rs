//! API Module
//!
//! REST surface for operating the autoscaler: lifecycle, passes,
//! configuration, topology and metrics.

pub mod rest;
pub mod server;
pub mod simulator;

pub use rest::*;
pub use server::*;
