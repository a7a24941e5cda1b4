use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{Resource, ResourceSnapshot, Result, StreamBurnError};

/// Inputs shared by every pipeline instance in a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTemplate {
    /// Media source locator, e.g. `rtsp://127.0.0.1:8554/test`.
    pub source: String,
    pub detection_model: PathBuf,
    pub classification_model: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpec {
    pub device: String,
    pub stream_count: u32,
    pub duration: Duration,
    pub template: PipelineTemplate,
}

impl TrialSpec {
    pub fn new(
        device: impl Into<String>,
        stream_count: u32,
        duration: Duration,
        template: PipelineTemplate,
    ) -> Result<Self> {
        if stream_count == 0 {
            return Err(StreamBurnError::Config("stream count must be at least 1".into()));
        }
        if duration.is_zero() {
            return Err(StreamBurnError::Config("trial duration must be positive".into()));
        }
        Ok(Self {
            device: device.into(),
            stream_count,
            duration,
            template,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub streams: u32,
    pub device: String,
    pub combined_fps: f64,
    pub per_stream_fps: f64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    #[serde(default)]
    pub gpu_percent: Option<f64>,
    #[serde(default)]
    pub npu_percent: Option<f64>,
    pub network_mbps: f64,
    pub bottleneck: Resource,
}

impl TrialResult {
    /// Derive throughput from the trial's frame total and take utilization
    /// from the end-of-trial snapshot.
    pub fn from_trial(
        spec: &TrialSpec,
        combined_units: u64,
        after: &ResourceSnapshot,
        network_mbps: f64,
    ) -> Self {
        let combined_fps = combined_units as f64 / spec.duration.as_secs_f64();
        let per_stream_fps = combined_fps / spec.stream_count as f64;

        Self {
            streams: spec.stream_count,
            device: spec.device.clone(),
            combined_fps,
            per_stream_fps,
            cpu_percent: after.cpu_percent,
            mem_percent: after.mem_percent,
            gpu_percent: after.gpu_percent,
            npu_percent: after.npu_percent,
            network_mbps: network_mbps.max(0.0),
            bottleneck: after.bottleneck(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> PipelineTemplate {
        PipelineTemplate {
            source: "rtsp://127.0.0.1:8554/test".into(),
            detection_model: "person.xml".into(),
            classification_model: "age.xml".into(),
        }
    }

    #[test]
    fn test_zero_streams_rejected() {
        let err = TrialSpec::new("CPU", 0, Duration::from_secs(1), template()).unwrap_err();
        assert!(matches!(err, StreamBurnError::Config(_)));
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(TrialSpec::new("CPU", 1, Duration::ZERO, template()).is_err());
    }

    #[test]
    fn test_per_stream_is_combined_over_streams() {
        let after = ResourceSnapshot {
            cpu_percent: 71.0,
            mem_percent: 40.0,
            gpu_percent: Some(12.0),
            npu_percent: None,
            net_bytes_received: 0,
        };
        for (streams, units) in [(1, 600), (3, 1001), (7, 2), (9, 0)] {
            let spec = TrialSpec::new("GPU", streams, Duration::from_secs(20), template()).unwrap();
            let r = TrialResult::from_trial(&spec, units, &after, 1.5);
            assert_eq!(r.per_stream_fps, r.combined_fps / streams as f64);
            assert_eq!(r.combined_fps, units as f64 / 20.0);
            assert_eq!(r.bottleneck, Resource::Cpu);
            assert_eq!(r.npu_percent, None);
        }
    }
}
