use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FrameCounter, Pipeline, PipelineDescriptor, PipelineEngine, PipelineError};

/// Synthetic frame source for dry runs.
///
/// A lone stream runs at `base_fps`; every other running stream slows each
/// one down by `contention`, so per-stream throughput falls as load grows.
#[derive(Clone)]
pub struct SimulatedEngine {
    base_fps: f64,
    contention: f64,
    max_instances: Option<usize>,
    live: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl SimulatedEngine {
    pub fn new(base_fps: f64, contention: f64) -> Self {
        Self {
            base_fps,
            contention,
            max_instances: None,
            live: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_instances(mut self, max_instances: Option<usize>) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn frame_interval(base_fps: f64, contention: f64, running: usize) -> Duration {
        let others = running.saturating_sub(1) as f64;
        let fps = base_fps / (1.0 + contention * others);
        Duration::from_secs_f64(1.0 / fps)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(60.0, 0.35)
    }
}

#[async_trait]
impl PipelineEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create(
        &self,
        descriptor: &PipelineDescriptor,
        counter: FrameCounter,
    ) -> Result<Box<dyn Pipeline>, PipelineError> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_instances {
            if live > max {
                self.live.fetch_sub(1, Ordering::SeqCst);
                return Err(PipelineError::Construction(format!(
                    "{} cannot host more than {} instances",
                    descriptor.device, max
                )));
            }
        }

        Ok(Box::new(SimulatedPipeline {
            base_fps: self.base_fps,
            contention: self.contention,
            counter,
            live: self.live.clone(),
            running: self.running.clone(),
            cancel: None,
        }))
    }
}

struct SimulatedPipeline {
    base_fps: f64,
    contention: f64,
    counter: FrameCounter,
    live: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    cancel: Option<CancellationToken>,
}

#[async_trait]
impl Pipeline for SimulatedPipeline {
    async fn start(&mut self) -> Result<(), PipelineError> {
        if self.cancel.is_some() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let counter = self.counter.clone();
        let running = self.running.clone();
        let (base_fps, contention) = (self.base_fps, self.contention);

        running.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                let interval = SimulatedEngine::frame_interval(
                    base_fps,
                    contention,
                    running.load(Ordering::SeqCst),
                );
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => counter.record(),
                }
            }
            debug!("Simulated stream stopped");
        });

        self.cancel = Some(cancel);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PipelineError> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for SimulatedPipeline {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamburn_core::PipelineTemplate;

    fn descriptor(index: usize) -> PipelineDescriptor {
        let template = PipelineTemplate {
            source: "simulated".into(),
            detection_model: "person.xml".into(),
            classification_model: "age.xml".into(),
        };
        PipelineDescriptor::build(&template, "CPU", index)
    }

    #[test]
    fn test_frame_interval_degrades_with_load() {
        assert_eq!(SimulatedEngine::frame_interval(50.0, 0.5, 1), Duration::from_millis(20));
        assert_eq!(SimulatedEngine::frame_interval(50.0, 0.5, 3), Duration::from_millis(40));
        assert_eq!(SimulatedEngine::frame_interval(50.0, 0.5, 0), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_stream_runs_at_base_rate() {
        let engine = SimulatedEngine::new(10.0, 0.0);
        let counter = FrameCounter::new();
        let mut pipeline = engine.create(&descriptor(0), counter.clone()).await.unwrap();

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        pipeline.stop().await.unwrap();

        assert_eq!(counter.get(), 10);
        assert_eq!(engine.running(), 0);
    }

    #[tokio::test]
    async fn test_instance_cap() {
        let engine = SimulatedEngine::default().with_max_instances(Some(2));
        let a = engine.create(&descriptor(0), FrameCounter::new()).await.unwrap();
        let _b = engine.create(&descriptor(1), FrameCounter::new()).await.unwrap();
        assert!(engine.create(&descriptor(2), FrameCounter::new()).await.is_err());

        drop(a);
        assert!(engine.create(&descriptor(2), FrameCounter::new()).await.is_ok());
    }
}
