//! Pipeline engine seam.
//!
//! An engine turns a [`PipelineDescriptor`] into a running media pipeline.
//! Each pipeline reports completed frames into the [`FrameCounter`] it was
//! created with, and nothing else writes to that counter.

mod gst;
mod simulated;

pub use gst::GstLaunchEngine;
pub use simulated::SimulatedEngine;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use streamburn_core::PipelineTemplate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Launcher not found: {0}")]
    LauncherNotFound(String),
    #[error("Failed to construct pipeline: {0}")]
    Construction(String),
    #[error("Failed to stop pipeline: {0}")]
    Stop(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-instance count of completed frames.
#[derive(Debug, Clone, Default)]
pub struct FrameCounter(Arc<AtomicU64>);

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, frames: u64) {
        self.0.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One instance's pipeline: detect, classify, then count frames at a named
/// `identity` element before discarding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub index: usize,
    pub device: String,
    pub counter_name: String,
    pub description: String,
}

impl PipelineDescriptor {
    pub fn build(template: &PipelineTemplate, device: &str, index: usize) -> Self {
        let counter_name = format!("ctr{index}");
        let description = format!(
            "rtspsrc location={source} latency=200 ! \
             rtph264depay ! h264parse ! avdec_h264 ! \
             videoconvert ! videoscale ! \
             gvadetect model={detect} device={device} ! \
             gvaclassify model={classify} device={device} ! \
             gvawatermark ! videoconvert ! \
             identity name={counter_name} silent=false ! fakesink",
            source = template.source,
            detect = template.detection_model.display(),
            classify = template.classification_model.display(),
        );

        Self {
            index,
            device: device.to_string(),
            counter_name,
            description,
        }
    }
}

#[async_trait]
pub trait Pipeline: Send {
    async fn start(&mut self) -> Result<(), PipelineError>;

    async fn stop(&mut self) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait PipelineEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(
        &self,
        descriptor: &PipelineDescriptor,
        counter: FrameCounter,
    ) -> Result<Box<dyn Pipeline>, PipelineError>;
}
