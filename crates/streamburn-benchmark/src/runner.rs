use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use streamburn_core::{Result, StreamBurnError, TrialSpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{FrameCounter, Pipeline, PipelineDescriptor, PipelineEngine};

pub struct TrialRunner {
    engine: Arc<dyn PipelineEngine>,
    stop_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub combined_units: u64,
    pub per_instance: Vec<u64>,
}

struct Instance {
    index: usize,
    pipeline: Box<dyn Pipeline>,
    counter: FrameCounter,
}

impl TrialRunner {
    pub fn new(engine: Arc<dyn PipelineEngine>, stop_timeout: Duration) -> Self {
        Self {
            engine,
            stop_timeout,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Run `spec.stream_count` pipelines for exactly `spec.duration`.
    ///
    /// Frame counts are taken when the observation window closes. Returns
    /// only after every instance has been stopped or has exceeded the stop
    /// timeout.
    #[instrument(skip(self, spec, cancel), fields(device = %spec.device, streams = spec.stream_count))]
    pub async fn run(&self, spec: &TrialSpec, cancel: &CancellationToken) -> Result<TrialOutcome> {
        info!("Starting trial");

        let mut instances = Vec::with_capacity(spec.stream_count as usize);
        for index in 0..spec.stream_count as usize {
            let descriptor = PipelineDescriptor::build(&spec.template, &spec.device, index);
            let counter = FrameCounter::new();
            match self.engine.create(&descriptor, counter.clone()).await {
                Ok(pipeline) => instances.push(Instance {
                    index,
                    pipeline,
                    counter,
                }),
                Err(e) => {
                    self.stop_all(&mut instances).await;
                    return Err(construction_failure(spec, index, e));
                }
            }
        }

        let mut failed = None;
        for instance in instances.iter_mut() {
            if let Err(e) = instance.pipeline.start().await {
                failed = Some((instance.index, e));
                break;
            }
        }
        if let Some((index, e)) = failed {
            self.stop_all(&mut instances).await;
            return Err(construction_failure(spec, index, e));
        }

        let started = tokio::time::Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(spec.duration) => {}
            _ = cancel.cancelled() => {
                warn!("Trial cancelled after {:?}", started.elapsed());
                self.stop_all(&mut instances).await;
                return Err(StreamBurnError::Cancelled);
            }
        }
        let per_instance: Vec<u64> = instances.iter().map(|i| i.counter.get()).collect();

        self.stop_all(&mut instances).await;

        let combined_units = per_instance.iter().sum();
        debug!(?per_instance, "Trial window closed");
        info!("Trial complete: {} frames", combined_units);

        Ok(TrialOutcome {
            combined_units,
            per_instance,
        })
    }

    /// Stop every instance concurrently. Failures and timeouts are logged and
    /// never prevent the remaining instances from stopping.
    async fn stop_all(&self, instances: &mut [Instance]) {
        let timeout = self.stop_timeout;
        let stops = instances.iter_mut().map(|instance| async move {
            match tokio::time::timeout(timeout, instance.pipeline.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Stream {} failed to stop: {}", instance.index, e),
                Err(_) => warn!(
                    "Stream {} did not stop within {:?}, abandoning it",
                    instance.index, timeout
                ),
            }
        });
        join_all(stops).await;
    }
}

fn construction_failure(
    spec: &TrialSpec,
    index: usize,
    err: impl std::fmt::Display,
) -> StreamBurnError {
    StreamBurnError::InstanceConstruction {
        device: spec.device.clone(),
        streams: spec.stream_count,
        message: format!("stream {}: {}", index, err),
    }
}
