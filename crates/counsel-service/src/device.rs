//! Device memory probing and GPU offload tier planning.

use counsel_config::GpuTierConfig;
use counsel_protocol::{DeviceClass, MemorySnapshot, ModelDescriptor};
use parking_lot::Mutex;
use sysinfo::System;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of memory facts for load admission, tier planning and heartbeats.
pub trait DeviceProbe: Send + Sync {
    /// Memory currently available to new allocations, in MB.
    fn available_mb(&self) -> u64;

    /// Resident set size of this process, in MB.
    fn rss_mb(&self) -> u64;

    /// Both numbers at once, for telemetry.
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            rss_mb: self.rss_mb(),
            available_mb: self.available_mb(),
        }
    }
}

/// Probe backed by the running system.
pub struct SystemProbe {
    system: Mutex<System>,
    pid: Option<sysinfo::Pid>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProbe for SystemProbe {
    fn available_mb(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.available_memory() / BYTES_PER_MB
    }

    fn rss_mb(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|process| process.memory() / BYTES_PER_MB)
            .unwrap_or(0)
    }
}

/// Probe returning pinned numbers; for tests and pinned deployments.
pub struct FixedProbe {
    pub available_mb: u64,
    pub rss_mb: u64,
}

impl DeviceProbe for FixedProbe {
    fn available_mb(&self) -> u64 {
        self.available_mb
    }

    fn rss_mb(&self) -> u64 {
        self.rss_mb
    }
}

/// Pick a GPU layer count for one load from available memory.
///
/// Tiers are discrete: full offload, partial offload, or cpu-only. The
/// count is computed fresh at every load, never cached, so a model reloaded
/// under different memory conditions lands on a different tier.
pub fn plan_gpu_layers(
    descriptor: &ModelDescriptor,
    gpu: &GpuTierConfig,
    probed_available_mb: u64,
) -> u32 {
    if descriptor.device == DeviceClass::Cpu {
        return 0;
    }
    let available_mb = gpu.memory_override_mb.unwrap_or(probed_available_mb);
    if available_mb >= gpu.full_offload_mb {
        descriptor.max_gpu_layers
    } else if available_mb >= gpu.partial_offload_mb {
        gpu.partial_layers.min(descriptor.max_gpu_layers)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gpu_descriptor(max_layers: u32) -> ModelDescriptor {
        ModelDescriptor {
            name: "reasoner".to_string(),
            path: "models/reasoner.gguf".into(),
            device: DeviceClass::Gpu,
            memory_cost_mb: 1024,
            max_gpu_layers: max_layers,
        }
    }

    #[test]
    fn cpu_models_never_offload() {
        let mut descriptor = gpu_descriptor(32);
        descriptor.device = DeviceClass::Cpu;
        assert_eq!(plan_gpu_layers(&descriptor, &GpuTierConfig::default(), u64::MAX), 0);
    }

    #[test]
    fn tiers_follow_available_memory() {
        let gpu = GpuTierConfig {
            full_offload_mb: 8192,
            partial_offload_mb: 4096,
            partial_layers: 16,
            memory_override_mb: None,
        };
        let descriptor = gpu_descriptor(32);
        assert_eq!(plan_gpu_layers(&descriptor, &gpu, 10_000), 32);
        assert_eq!(plan_gpu_layers(&descriptor, &gpu, 5_000), 16);
        assert_eq!(plan_gpu_layers(&descriptor, &gpu, 1_000), 0);
    }

    #[test]
    fn partial_tier_respects_model_layer_count() {
        let gpu = GpuTierConfig {
            full_offload_mb: 8192,
            partial_offload_mb: 4096,
            partial_layers: 16,
            memory_override_mb: None,
        };
        assert_eq!(plan_gpu_layers(&gpu_descriptor(8), &gpu, 5_000), 8);
    }

    #[test]
    fn override_beats_the_probe() {
        let gpu = GpuTierConfig {
            full_offload_mb: 8192,
            partial_offload_mb: 4096,
            partial_layers: 16,
            memory_override_mb: Some(10_000),
        };
        assert_eq!(plan_gpu_layers(&gpu_descriptor(32), &gpu, 0), 32);
    }

    #[test]
    fn fixed_probe_reports_its_numbers() {
        let probe = FixedProbe {
            available_mb: 2048,
            rss_mb: 512,
        };
        let snapshot = probe.snapshot();
        assert_eq!(snapshot.available_mb, 2048);
        assert_eq!(snapshot.rss_mb, 512);
    }
}
