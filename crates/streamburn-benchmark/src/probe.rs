//! Optional utilization probes for accelerators that expose busy counters in sysfs.
//!
//! A probe returns `None` when no device exposes a reading. That is an absent
//! value, not a zero load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

pub trait UtilizationProbe: Send {
    fn name(&self) -> &'static str;

    fn read_percent(&mut self) -> Option<f64>;
}

/// Always absent.
pub struct NoProbe;

impl UtilizationProbe for NoProbe {
    fn name(&self) -> &'static str {
        "none"
    }

    fn read_percent(&mut self) -> Option<f64> {
        None
    }
}

/// Reads `gpu_busy_percent` from the first DRM card that has one.
pub struct SysfsGpuProbe {
    root: PathBuf,
}

impl SysfsGpuProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsGpuProbe {
    fn default() -> Self {
        Self::new("/sys/class/drm")
    }
}

impl UtilizationProbe for SysfsGpuProbe {
    fn name(&self) -> &'static str {
        "sysfs-gpu"
    }

    fn read_percent(&mut self) -> Option<f64> {
        device_files(&self.root, "gpu_busy_percent")
            .into_iter()
            .find_map(|path| read_trimmed(&path)?.parse::<f64>().ok())
            .map(|v| v.clamp(0.0, 100.0))
    }
}

/// Derives NPU load from the cumulative `npu_busy_time_us` counter.
///
/// The first read only records a baseline and reports no reading; later reads
/// report busy time as a share of wall time since the previous read.
pub struct NpuBusyTimeProbe {
    root: PathBuf,
    last: Option<(Instant, u64)>,
}

impl NpuBusyTimeProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last: None,
        }
    }
}

impl Default for NpuBusyTimeProbe {
    fn default() -> Self {
        Self::new("/sys/class/accel")
    }
}

impl UtilizationProbe for NpuBusyTimeProbe {
    fn name(&self) -> &'static str {
        "sysfs-npu"
    }

    fn read_percent(&mut self) -> Option<f64> {
        let busy_us = device_files(&self.root, "npu_busy_time_us")
            .into_iter()
            .find_map(|path| read_trimmed(&path)?.parse::<u64>().ok())?;
        let now = Instant::now();

        let percent = self.last.and_then(|(then, prev_busy)| {
            let wall_us = now.duration_since(then).as_micros() as f64;
            if wall_us <= 0.0 || busy_us < prev_busy {
                return None;
            }
            Some(((busy_us - prev_busy) as f64 / wall_us * 100.0).clamp(0.0, 100.0))
        });

        self.last = Some((now, busy_us));
        percent
    }
}

/// `<root>/<entry>/device/<file>` for every entry, in name order.
fn device_files(root: &Path, file: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        debug!("No sysfs class at {:?}", root);
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path().join("device").join(file))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    paths
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
