//! Scaling decision for one class

use crate::config::Class;
use serde::{Deserialize, Serialize};

/// What a pass does for a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// Add one disk set
    Add,
    /// Remove one device
    Remove,
    /// Leave the class alone
    NoChange,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Add => write!(f, "add"),
            Decision::Remove => write!(f, "remove"),
            Decision::NoChange => write!(f, "no-change"),
        }
    }
}

/// Decide whether to grow, shrink or keep a class given its cluster
/// utilization and total size.
///
/// Growth wins over shrinking. The size bounds override the watermarks: a
/// class below its minimum always grows and one above its maximum always
/// shrinks.
pub fn decide(class: &Class, utilization: u32, total_gb: u64) -> Decision {
    let disk = class.disk_size_gb;
    let min = class.minimum_total_size_gb;
    let max = class.maximum_total_size_gb;

    let grow = utilization >= class.watermark_high && total_gb.saturating_add(disk) <= max;
    if grow || total_gb < min {
        return Decision::Add;
    }

    let shrink = utilization <= class.watermark_low
        && total_gb.checked_sub(disk).map_or(false, |rest| rest >= min);
    if shrink || total_gb > max {
        return Decision::Remove;
    }

    Decision::NoChange
}
