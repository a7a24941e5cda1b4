use serde::{Deserialize, Serialize};
use std::fmt;

/// A measured resource that can limit throughput.
///
/// Declaration order is the tie-break order used by [`detect_bottleneck`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    #[serde(rename = "CPU")]
    Cpu,
    Memory,
    #[serde(rename = "GPU")]
    Gpu,
    #[serde(rename = "NPU")]
    Npu,
}

impl Resource {
    pub fn label(&self) -> &'static str {
        match self {
            Resource::Cpu => "CPU",
            Resource::Memory => "Memory",
            Resource::Gpu => "GPU",
            Resource::Npu => "NPU",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Name the resource with the highest utilization.
///
/// Absent GPU/NPU readings are left out of the comparison entirely. On a tie
/// the first resource in `CPU, Memory, GPU, NPU` order wins.
pub fn detect_bottleneck(cpu: f64, mem: f64, gpu: Option<f64>, npu: Option<f64>) -> Resource {
    let candidates = [
        (Resource::Memory, Some(mem)),
        (Resource::Gpu, gpu),
        (Resource::Npu, npu),
    ];

    let mut best = (Resource::Cpu, cpu);
    for (resource, reading) in candidates {
        let Some(value) = reading else { continue };
        if value > best.1 {
            best = (resource, value);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_wins_when_highest() {
        assert_eq!(detect_bottleneck(50.0, 30.0, Some(90.0), None), Resource::Gpu);
    }

    #[test]
    fn test_memory_wins_over_present_gpu() {
        assert_eq!(detect_bottleneck(50.0, 90.0, Some(50.0), None), Resource::Memory);
    }

    #[test]
    fn test_tie_goes_to_cpu() {
        assert_eq!(detect_bottleneck(50.0, 50.0, None, None), Resource::Cpu);
    }

    #[test]
    fn test_tie_between_optionals_keeps_enumeration_order() {
        assert_eq!(detect_bottleneck(10.0, 20.0, Some(70.0), Some(70.0)), Resource::Gpu);
        assert_eq!(detect_bottleneck(10.0, 20.0, Some(60.0), Some(70.0)), Resource::Npu);
    }

    #[test]
    fn test_absent_readings_never_selected() {
        for (cpu, mem) in [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (42.5, 42.5)] {
            let r = detect_bottleneck(cpu, mem, None, None);
            assert!(matches!(r, Resource::Cpu | Resource::Memory));
        }
    }

    #[test]
    fn test_zero_gpu_reading_is_still_a_candidate() {
        // 0.0 is a reading, not an absence
        assert_eq!(detect_bottleneck(-1.0, -1.0, Some(0.0), None), Resource::Gpu);
    }

    #[test]
    fn test_labels() {
        let labels: Vec<_> = [Resource::Cpu, Resource::Memory, Resource::Gpu, Resource::Npu]
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(labels, ["CPU", "Memory", "GPU", "NPU"]);
        assert_eq!(serde_json::to_string(&Resource::Npu).unwrap(), "\"NPU\"");
    }
}
