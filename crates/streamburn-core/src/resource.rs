use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{detect_bottleneck, Resource};

/// Readings taken at one instant from a single metrics source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    #[serde(default)]
    pub gpu_percent: Option<f64>,
    #[serde(default)]
    pub npu_percent: Option<f64>,
    /// Cumulative bytes received on the sampled interface.
    pub net_bytes_received: u64,
}

impl ResourceSnapshot {
    pub fn bottleneck(&self) -> Resource {
        detect_bottleneck(
            self.cpu_percent,
            self.mem_percent,
            self.gpu_percent,
            self.npu_percent,
        )
    }
}

/// Receive throughput between two snapshots in megabits per second.
///
/// A counter that went backwards (interface reset) counts as zero traffic.
pub fn network_mbps(before: &ResourceSnapshot, after: &ResourceSnapshot, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let bytes = after.net_bytes_received.saturating_sub(before.net_bytes_received);
    bytes as f64 * 8.0 / 1e6 / secs
}
