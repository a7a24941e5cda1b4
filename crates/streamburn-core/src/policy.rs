use serde::{Deserialize, Serialize};

/// Stream-count schedule and stopping rule for one device sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub step: u32,
    pub max_streams: u32,
    pub target_fps: f64,
}

impl ScalingPolicy {
    /// Stream counts `1, 1 + step, 1 + 2*step, ...` up to and including `max_streams`.
    pub fn stream_counts(&self) -> impl Iterator<Item = u32> {
        (1..=self.max_streams).step_by(self.step.max(1) as usize)
    }

    /// Whether a trial ends the sweep for its device.
    ///
    /// The first trial of a sweep never stops it: a single stream can miss the
    /// target on pipeline warm-up alone.
    pub fn is_below_target(&self, first_trial: bool, per_stream_fps: f64) -> bool {
        !first_trial && per_stream_fps < self.target_fps
    }
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            step: 2,
            max_streams: 10,
            target_fps: 15.0,
        }
    }
}
