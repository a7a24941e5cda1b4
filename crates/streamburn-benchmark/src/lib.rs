pub mod controller;
pub mod engine;
pub mod probe;
pub mod provision;
pub mod recorder;
pub mod runner;
pub mod sampler;

pub use controller::{DeviceOutcome, SweepController, SweepEnd, SweepReport};
pub use engine::{
    FrameCounter, GstLaunchEngine, Pipeline, PipelineDescriptor, PipelineEngine, PipelineError,
    SimulatedEngine,
};
pub use probe::{NoProbe, NpuBusyTimeProbe, SysfsGpuProbe, UtilizationProbe};
pub use provision::{resolve_model_arg, ModelStore};
pub use recorder::{ResultRecorder, TrialSink};
pub use runner::{TrialOutcome, TrialRunner};
pub use sampler::{MetricsSource, ResourceSampler, SystemMetrics};
