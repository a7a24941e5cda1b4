pub mod bottleneck;
pub mod config;
pub mod error;
pub mod policy;
pub mod resource;
pub mod trial;

pub use bottleneck::{detect_bottleneck, Resource};
pub use config::{EngineKind, SweepConfig};
pub use error::{Result, StreamBurnError};
pub use policy::ScalingPolicy;
pub use resource::{network_mbps, ResourceSnapshot};
pub use trial::{PipelineTemplate, TrialResult, TrialSpec};
