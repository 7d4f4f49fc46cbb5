//! Static model metadata shared by the config catalog and the registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Device class a model prefers to run on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// CPU-resident; no mutual exclusion applies.
    #[default]
    Cpu,
    /// GPU-resident; at most one such model may be loaded at a time.
    Gpu,
}

impl DeviceClass {
    /// Stable lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Cpu => "cpu",
            DeviceClass::Gpu => "gpu",
        }
    }
}

/// Static metadata for one loadable model. Immutable after registry init.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    /// Unique model name used in requests and config references.
    pub name: String,
    /// Path to the weights file on disk.
    pub path: PathBuf,
    /// Preferred device class.
    #[serde(default)]
    pub device: DeviceClass,
    /// Estimated memory cost when fully loaded, in megabytes.
    #[serde(default = "default_memory_cost_mb")]
    pub memory_cost_mb: u64,
    /// Maximum layers the model can offload to the device.
    #[serde(default = "default_max_gpu_layers")]
    pub max_gpu_layers: u32,
}

/// Default estimated memory cost for a catalog entry.
fn default_memory_cost_mb() -> u64 {
    1024
}

/// Default offloadable layer count for a catalog entry.
fn default_max_gpu_layers() -> u32 {
    32
}
