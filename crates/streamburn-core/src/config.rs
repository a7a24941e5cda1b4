use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{ScalingPolicy, Result, StreamBurnError};

pub const ENV_OUTPUT: &str = "STREAMBURN_OUTPUT";
pub const ENV_NET_INTERFACE: &str = "STREAMBURN_NET_INTERFACE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Gst,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub devices: Vec<String>,
    pub step: u32,
    pub max_streams: u32,
    pub duration_secs: u64,
    pub target_fps: f64,
    pub output: PathBuf,
    pub net_interface: String,
    pub stop_timeout_ms: u64,
    pub engine: EngineKind,
    pub source: Option<String>,
    pub detection_model: Option<String>,
    pub classification_model: Option<String>,
    pub models: ModelsConfig,
    pub simulated: SimulatedConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            devices: vec!["CPU".to_string(), "GPU".to_string(), "NPU".to_string()],
            step: 2,
            max_streams: 10,
            duration_secs: 20,
            target_fps: 15.0,
            output: PathBuf::from("benchmark_results.csv"),
            net_interface: "lo".to_string(),
            stop_timeout_ms: 5_000,
            engine: EngineKind::default(),
            source: None,
            detection_model: None,
            classification_model: None,
            models: ModelsConfig::default(),
            simulated: SimulatedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    pub precision: String,
    /// Open Model Zoo `downloader.py`, used when a named model is missing.
    pub downloader: Option<PathBuf>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            precision: "FP32".to_string(),
            downloader: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Frames per second of a lone stream.
    pub base_fps: f64,
    /// Fractional slowdown added per extra concurrent stream.
    pub contention: f64,
    /// Live instance cap; creating one more fails like an exhausted device.
    pub max_instances: Option<usize>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            base_fps: 60.0,
            contention: 0.35,
            max_instances: None,
        }
    }
}

impl SweepConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(output) = lookup(ENV_OUTPUT).filter(|v| !v.is_empty()) {
            self.output = PathBuf::from(output);
        }
        if let Some(iface) = lookup(ENV_NET_INTERFACE).filter(|v| !v.is_empty()) {
            self.net_interface = iface;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() || self.devices.iter().any(|d| d.trim().is_empty()) {
            return Err(config_err("at least one non-empty device is required"));
        }
        if self.step == 0 {
            return Err(config_err("step must be at least 1"));
        }
        if self.max_streams == 0 {
            return Err(config_err("max-streams must be at least 1"));
        }
        if self.duration_secs == 0 {
            return Err(config_err("duration must be at least 1 second"));
        }
        if !self.target_fps.is_finite() || self.target_fps < 0.0 {
            return Err(config_err("target-fps must be a non-negative number"));
        }
        if self.engine == EngineKind::Simulated {
            let fps = self.simulated.base_fps;
            if fps.is_nan() || fps <= 0.0 || self.simulated.contention < 0.0 {
                return Err(config_err("simulated engine needs base_fps > 0 and contention >= 0"));
            }
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("source", self.source.is_none()),
            ("detection-model", self.detection_model.is_none()),
            ("classification-model", self.classification_model.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(config_err(&format!("missing required input: {}", missing.join(", "))));
        }
        Ok(())
    }

    pub fn policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            step: self.step,
            max_streams: self.max_streams,
            target_fps: self.target_fps,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn config_err(msg: &str) -> StreamBurnError {
    StreamBurnError::Config(msg.to_string())
}
