use serde::Serialize;
use std::time::Duration;
use streamburn_core::{
    network_mbps, PipelineTemplate, Result, ScalingPolicy, StreamBurnError, TrialResult, TrialSpec,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::recorder::TrialSink;
use crate::runner::TrialRunner;
use crate::sampler::ResourceSampler;

/// Why a device sweep ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SweepEnd {
    BelowTarget { streams: u32 },
    CeilingReached,
    ConstructionFailed { streams: u32, message: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub trials: Vec<TrialResult>,
    /// Highest stream count whose per-stream FPS met the target.
    pub best_streams: Option<u32>,
    pub end: SweepEnd,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub devices: Vec<DeviceOutcome>,
    pub cancelled: bool,
}

impl SweepReport {
    pub fn trial_count(&self) -> usize {
        self.devices.iter().map(|d| d.trials.len()).sum()
    }
}

pub struct SweepController {
    runner: TrialRunner,
    sampler: ResourceSampler,
    policy: ScalingPolicy,
    duration: Duration,
    template: PipelineTemplate,
}

impl SweepController {
    pub fn new(
        runner: TrialRunner,
        sampler: ResourceSampler,
        policy: ScalingPolicy,
        duration: Duration,
        template: PipelineTemplate,
    ) -> Self {
        Self {
            runner,
            sampler,
            policy,
            duration,
            template,
        }
    }

    /// Sweep each device in order, one trial at a time.
    ///
    /// A construction failure abandons only the current device. A sink
    /// failure aborts the whole run.
    #[instrument(skip_all, fields(engine = self.runner.engine_name()))]
    pub async fn run(
        &mut self,
        devices: &[String],
        sink: &mut dyn TrialSink,
        cancel: &CancellationToken,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for device in devices {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = self.sweep_device(device, sink, cancel).await?;
            sink.device_finished(&outcome)?;
            let cancelled = outcome.end == SweepEnd::Cancelled;
            report.devices.push(outcome);
            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        info!("Sweep finished: {} trials recorded", report.trial_count());
        Ok(report)
    }

    #[instrument(skip(self, sink, cancel))]
    async fn sweep_device(
        &mut self,
        device: &str,
        sink: &mut dyn TrialSink,
        cancel: &CancellationToken,
    ) -> Result<DeviceOutcome> {
        info!(
            "Sweeping {}: step {}, max {} streams, target {:.1} fps/stream",
            device, self.policy.step, self.policy.max_streams, self.policy.target_fps
        );

        let mut trials = Vec::new();
        let mut best_streams = None;
        let mut end = SweepEnd::CeilingReached;

        for (i, streams) in self.policy.stream_counts().enumerate() {
            if cancel.is_cancelled() {
                end = SweepEnd::Cancelled;
                break;
            }
            let spec = TrialSpec::new(device, streams, self.duration, self.template.clone())?;

            let before = self.sampler.sample();
            let outcome = match self.runner.run(&spec, cancel).await {
                Ok(outcome) => outcome,
                Err(StreamBurnError::Cancelled) => {
                    end = SweepEnd::Cancelled;
                    break;
                }
                Err(StreamBurnError::InstanceConstruction { message, .. }) => {
                    warn!("Abandoning {} at {} streams: {}", device, streams, message);
                    end = SweepEnd::ConstructionFailed { streams, message };
                    break;
                }
                Err(e) => return Err(e),
            };
            let after = self.sampler.sample();

            let mbps = network_mbps(&before, &after, spec.duration);
            let result = TrialResult::from_trial(&spec, outcome.combined_units, &after, mbps);
            sink.record(&result)?;

            let first_trial = i == 0;
            let below = self.policy.is_below_target(first_trial, result.per_stream_fps);
            if result.per_stream_fps >= self.policy.target_fps {
                best_streams = Some(streams);
            }
            trials.push(result);

            if below {
                info!("{} fell below target at {} streams", device, streams);
                end = SweepEnd::BelowTarget { streams };
                break;
            }
        }

        Ok(DeviceOutcome {
            device: device.to_string(),
            trials,
            best_streams,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::tests::{template, ScriptedEngine};
    use crate::sampler::tests::ScriptedMetrics;
    use std::sync::Arc;
    use streamburn_core::{Resource, ResourceSnapshot};

    const DURATION: Duration = Duration::from_secs(20);

    #[derive(Default)]
    struct VecSink {
        results: Vec<TrialResult>,
        finished: Vec<String>,
        fail_after: Option<usize>,
    }

    impl TrialSink for VecSink {
        fn record(&mut self, result: &TrialResult) -> Result<()> {
            if self.fail_after == Some(self.results.len()) {
                return Err(StreamBurnError::LogWrite("disk full".into()));
            }
            self.results.push(result.clone());
            Ok(())
        }

        fn device_finished(&mut self, outcome: &DeviceOutcome) -> Result<()> {
            self.finished.push(outcome.device.clone());
            Ok(())
        }
    }

    fn fps_to_frames(per_stream_fps: &[u64]) -> Vec<u64> {
        per_stream_fps.iter().map(|fps| fps * DURATION.as_secs()).collect()
    }

    fn controller(engine: ScriptedEngine, metrics: ScriptedMetrics, policy: ScalingPolicy) -> SweepController {
        let runner = TrialRunner::new(Arc::new(engine), Duration::from_secs(5));
        let sampler = ResourceSampler::new(Box::new(metrics), "lo");
        SweepController::new(runner, sampler, policy, DURATION, template())
    }

    fn policy(step: u32, max_streams: u32, target_fps: f64) -> ScalingPolicy {
        ScalingPolicy { step, max_streams, target_fps }
    }

    fn devices(names: &[&str]) -> Vec<String> {
        names.iter().map(|d| d.to_string()).collect()
    }

    fn streams_of(results: &[TrialResult]) -> Vec<(String, u32)> {
        results.iter().map(|r| (r.device.clone(), r.streams)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_miss_after_first_trial() {
        let engine = ScriptedEngine::with_frames("CPU", &fps_to_frames(&[40, 20, 10, 5]));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(2, 10, 15.0));
        let mut sink = VecSink::default();

        let report = ctl
            .run(&devices(&["CPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let per_stream: Vec<f64> = sink.results.iter().map(|r| r.per_stream_fps).collect();
        assert_eq!(sink.results.iter().map(|r| r.streams).collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(per_stream, vec![40.0, 20.0, 10.0]);
        assert_eq!(report.devices[0].end, SweepEnd::BelowTarget { streams: 5 });
        assert_eq!(report.devices[0].best_streams, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_trial_below_target_does_not_stop() {
        let engine = ScriptedEngine::with_frames("CPU", &fps_to_frames(&[5, 30, 4]));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(2, 10, 15.0));
        let mut sink = VecSink::default();

        ctl.run(&devices(&["CPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.results.iter().map(|r| r.streams).collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_ends_sweep() {
        let engine = ScriptedEngine::with_frames("GPU", &fps_to_frames(&[60; 8]));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(3, 8, 15.0));
        let mut sink = VecSink::default();

        let report = ctl
            .run(&devices(&["GPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let streams: Vec<u32> = sink.results.iter().map(|r| r.streams).collect();
        assert_eq!(streams, vec![1, 4, 7]);
        assert!(streams.iter().all(|&s| s <= 8));
        assert_eq!(report.devices[0].end, SweepEnd::CeilingReached);
        assert_eq!(report.devices[0].best_streams, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_swept_in_order() {
        let mut engine = ScriptedEngine::with_frames("NPU", &fps_to_frames(&[50, 10]));
        engine.add_device("CPU", &fps_to_frames(&[30, 12]));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(2, 10, 15.0));
        let mut sink = VecSink::default();

        ctl.run(&devices(&["NPU", "CPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            streams_of(&sink.results),
            vec![
                ("NPU".to_string(), 1),
                ("NPU".to_string(), 3),
                ("CPU".to_string(), 1),
                ("CPU".to_string(), 3),
            ]
        );
        assert_eq!(sink.finished, vec!["NPU".to_string(), "CPU".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_construction_failure_moves_to_next_device() {
        let mut engine = ScriptedEngine::with_frames("GPU", &fps_to_frames(&[40, 40, 40]));
        engine.add_device("CPU", &fps_to_frames(&[40, 10]));
        engine.fail_create = Some(("GPU".into(), 1, 2));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(2, 10, 15.0));
        let mut sink = VecSink::default();

        let report = ctl
            .run(&devices(&["GPU", "CPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            streams_of(&sink.results),
            vec![("GPU".to_string(), 1), ("CPU".to_string(), 1), ("CPU".to_string(), 3)]
        );
        assert!(matches!(
            report.devices[0].end,
            SweepEnd::ConstructionFailed { streams: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_halts_run() {
        let engine = ScriptedEngine::with_frames("CPU", &fps_to_frames(&[40, 40, 40]));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(2, 10, 15.0));
        let mut sink = VecSink {
            fail_after: Some(1),
            ..Default::default()
        };

        let err = ctl
            .run(&devices(&["CPU", "GPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StreamBurnError::LogWrite(_)));
        assert_eq!(sink.results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_utilization_from_after_snapshot_and_network_delta() {
        let before = ResourceSnapshot {
            cpu_percent: 99.0,
            mem_percent: 10.0,
            gpu_percent: None,
            npu_percent: None,
            net_bytes_received: 5_000_000,
        };
        let after = ResourceSnapshot {
            cpu_percent: 20.0,
            mem_percent: 30.0,
            gpu_percent: Some(75.0),
            npu_percent: None,
            net_bytes_received: 30_000_000,
        };
        let metrics = ScriptedMetrics::new(vec![before, after]);
        let engine = ScriptedEngine::with_frames("GPU", &fps_to_frames(&[40]));
        let mut ctl = controller(engine, metrics.clone(), policy(2, 1, 15.0));
        let mut sink = VecSink::default();

        ctl.run(&devices(&["GPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let r = &sink.results[0];
        assert_eq!(r.cpu_percent, 20.0);
        assert_eq!(r.gpu_percent, Some(75.0));
        assert_eq!(r.bottleneck, Resource::Gpu);
        assert!((r.network_mbps - 10.0).abs() < 1e-9);
        assert!(metrics.interfaces.lock().unwrap().iter().all(|i| i == "lo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_reset_reports_zero_network() {
        let mk = |bytes| ResourceSnapshot {
            net_bytes_received: bytes,
            ..Default::default()
        };
        let metrics = ScriptedMetrics::new(vec![mk(9_000_000), mk(1_000)]);
        let engine = ScriptedEngine::with_frames("CPU", &fps_to_frames(&[40]));
        let mut ctl = controller(engine, metrics, policy(2, 1, 15.0));
        let mut sink = VecSink::default();

        ctl.run(&devices(&["CPU"]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.results[0].network_mbps, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_devices() {
        let engine = ScriptedEngine::with_frames("CPU", &fps_to_frames(&[40, 10]));
        let mut ctl = controller(engine, ScriptedMetrics::default(), policy(2, 10, 15.0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = VecSink::default();

        let report = ctl.run(&devices(&["CPU"]), &mut sink, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(sink.results.is_empty());
    }
}
