use streamburn_core::ResourceSnapshot;
use sysinfo::{Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{debug, instrument};

use crate::probe::{NpuBusyTimeProbe, SysfsGpuProbe, UtilizationProbe};

/// Point-in-time system readings.
///
/// CPU load is measured since the previous `cpu_percent` call on the same
/// source, so a before/after pair around a trial covers the trial itself.
pub trait MetricsSource: Send {
    fn cpu_percent(&mut self) -> f64;

    fn mem_percent(&mut self) -> f64;

    fn gpu_percent(&mut self) -> Option<f64>;

    fn npu_percent(&mut self) -> Option<f64>;

    /// Cumulative received bytes on `interface`, or across all interfaces
    /// when it does not exist.
    fn net_bytes_received(&mut self, interface: &str) -> u64;
}

pub struct SystemMetrics {
    system: System,
    gpu: Box<dyn UtilizationProbe>,
    npu: Box<dyn UtilizationProbe>,
}

impl SystemMetrics {
    pub fn new(gpu: Box<dyn UtilizationProbe>, npu: Box<dyn UtilizationProbe>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        debug!("System metrics: gpu={} npu={}", gpu.name(), npu.name());
        Self { system, gpu, npu }
    }

    /// sysinfo for CPU, memory and network; sysfs probes for GPU and NPU.
    pub fn detect() -> Self {
        Self::new(
            Box::new(SysfsGpuProbe::default()),
            Box::new(NpuBusyTimeProbe::default()),
        )
    }
}

impl MetricsSource for SystemMetrics {
    fn cpu_percent(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        let total: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        (total as f64 / cpus.len() as f64).clamp(0.0, 100.0)
    }

    fn mem_percent(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(self.system.available_memory());
        (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }

    fn gpu_percent(&mut self) -> Option<f64> {
        self.gpu.read_percent()
    }

    fn npu_percent(&mut self) -> Option<f64> {
        self.npu.read_percent()
    }

    fn net_bytes_received(&mut self, interface: &str) -> u64 {
        let networks = Networks::new_with_refreshed_list();
        match networks.iter().find(|(name, _)| name.as_str() == interface) {
            Some((_, data)) => data.total_received(),
            None => networks.iter().map(|(_, data)| data.total_received()).sum(),
        }
    }
}

/// Takes [`ResourceSnapshot`]s from one metrics source and one interface, so
/// a before/after pair is always comparable.
pub struct ResourceSampler {
    source: Box<dyn MetricsSource>,
    interface: String,
}

impl ResourceSampler {
    pub fn new(source: Box<dyn MetricsSource>, interface: impl Into<String>) -> Self {
        Self {
            source,
            interface: interface.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    #[instrument(skip(self), fields(interface = %self.interface))]
    pub fn sample(&mut self) -> ResourceSnapshot {
        let snapshot = ResourceSnapshot {
            cpu_percent: self.source.cpu_percent(),
            mem_percent: self.source.mem_percent(),
            gpu_percent: self.source.gpu_percent(),
            npu_percent: self.source.npu_percent(),
            net_bytes_received: self.source.net_bytes_received(&self.interface),
        };
        debug!(?snapshot, "Sampled resources");
        snapshot
    }

    /// A standalone snapshot. Interval-based readings (CPU, NPU busy time)
    /// need a baseline, so one sample is discarded first.
    pub async fn settled_sample(&mut self) -> ResourceSnapshot {
        self.sample();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.sample()
    }
}
