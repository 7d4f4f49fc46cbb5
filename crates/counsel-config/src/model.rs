//! Configuration schema for Counsel.

use counsel_protocol::{ModelDescriptor, ResponseStyle};
use serde::{Deserialize, Serialize};

/// Root config for the Counsel supervisor and its model service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CounselConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl CounselConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> CounselConfigBuilder {
        CounselConfigBuilder::new()
    }

    /// Resolve the catalog entry backing the embedding role.
    pub fn embedding_descriptor(&self) -> Option<&ModelDescriptor> {
        self.descriptor(&self.models.embedding)
    }

    /// Resolve the catalog entry backing the utility (scoring) role.
    pub fn utility_descriptor(&self) -> Option<&ModelDescriptor> {
        self.descriptor(&self.models.utility)
    }

    /// Resolve the catalog entry backing the generation role.
    pub fn generation_descriptor(&self) -> Option<&ModelDescriptor> {
        self.descriptor(&self.models.generation)
    }

    fn descriptor(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models
            .catalog
            .iter()
            .find(|descriptor| descriptor.name == name)
    }
}

/// Builder for assembling a `CounselConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct CounselConfigBuilder {
    config: CounselConfig,
}

impl CounselConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: CounselConfig::default(),
        }
    }

    /// Replace the model catalog configuration.
    pub fn models(mut self, models: ModelsConfig) -> Self {
        self.config.models = models;
        self
    }

    /// Replace the retrieval configuration.
    pub fn retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.config.retrieval = retrieval;
        self
    }

    /// Replace the relevance analysis configuration.
    pub fn analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.config.analysis = analysis;
        self
    }

    /// Replace the answer generation configuration.
    pub fn generation(mut self, generation: GenerationConfig) -> Self {
        self.config.generation = generation;
        self
    }

    /// Replace the service process configuration.
    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.config.service = service;
        self
    }

    /// Replace the recovery automation configuration.
    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.config.recovery = recovery;
        self
    }

    /// Finalize and return the built `CounselConfig`.
    pub fn build(self) -> CounselConfig {
        self.config
    }
}

/// Model catalog plus role assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Every loadable model variant, keyed by unique name.
    #[serde(default)]
    pub catalog: Vec<ModelDescriptor>,
    /// Catalog name serving the embedding role.
    #[serde(default = "default_embedding_model")]
    pub embedding: String,
    /// Catalog name serving the utility (relevance scoring) role.
    #[serde(default = "default_utility_model")]
    pub utility: String,
    /// Catalog name serving the generation role.
    #[serde(default = "default_generation_model")]
    pub generation: String,
    /// GPU offload tier thresholds.
    #[serde(default)]
    pub gpu: GpuTierConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            catalog: Vec::new(),
            embedding: default_embedding_model(),
            utility: default_utility_model(),
            generation: default_generation_model(),
            gpu: GpuTierConfig::default(),
        }
    }
}

/// Default catalog name for the embedding role.
fn default_embedding_model() -> String {
    "embedder".to_string()
}

/// Default catalog name for the utility role.
fn default_utility_model() -> String {
    "utility".to_string()
}

/// Default catalog name for the generation role.
fn default_generation_model() -> String {
    "reasoner".to_string()
}

/// Discrete GPU offload tiers selected from available device memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuTierConfig {
    /// Available memory above which all layers are offloaded, in MB.
    #[serde(default = "default_full_offload_mb")]
    pub full_offload_mb: u64,
    /// Available memory above which a partial offload is used, in MB.
    #[serde(default = "default_partial_offload_mb")]
    pub partial_offload_mb: u64,
    /// Layer count used at the partial tier.
    #[serde(default = "default_partial_layers")]
    pub partial_layers: u32,
    /// Override for probed available memory; mainly for tests and pinned
    /// deployments.
    #[serde(default)]
    pub memory_override_mb: Option<u64>,
}

impl Default for GpuTierConfig {
    fn default() -> Self {
        Self {
            full_offload_mb: default_full_offload_mb(),
            partial_offload_mb: default_partial_offload_mb(),
            partial_layers: default_partial_layers(),
            memory_override_mb: None,
        }
    }
}

/// Default high-memory threshold for full GPU offload.
fn default_full_offload_mb() -> u64 {
    8192
}

/// Default mid-memory threshold for partial GPU offload.
fn default_partial_offload_mb() -> u64 {
    4096
}

/// Default layer count at the partial tier.
fn default_partial_layers() -> u32 {
    16
}

/// Vector index location and retrieval defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Path to the chunk index file written by ingestion.
    #[serde(default)]
    pub index_path: Option<String>,
    /// Default maximum chunks retrieved per question.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            max_chunks: default_max_chunks(),
        }
    }
}

/// Default retrieval depth per question.
fn default_max_chunks() -> usize {
    5
}

/// Relevance analysis tuning. Threshold and enablement are hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Whether the utility model is used at all; when false every chunk
    /// passes with score 1.0.
    #[serde(default = "default_utility_enabled")]
    pub utility_enabled: bool,
    /// Chunks scoring below this are dropped (top-1 always retained).
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    /// Timeout for one scoring call, in milliseconds.
    #[serde(default = "default_score_timeout_ms")]
    pub score_timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            utility_enabled: default_utility_enabled(),
            relevance_threshold: default_relevance_threshold(),
            score_timeout_ms: default_score_timeout_ms(),
        }
    }
}

/// Default toggle for utility-model scoring.
fn default_utility_enabled() -> bool {
    true
}

/// Default relevance threshold for chunk filtering.
fn default_relevance_threshold() -> f32 {
    0.3
}

/// Default scoring timeout in milliseconds.
fn default_score_timeout_ms() -> u64 {
    5_000
}

/// Answer generation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Timeout for one generation call, in milliseconds.
    #[serde(default = "default_generate_timeout_ms")]
    pub generate_timeout_ms: u64,
    /// Style used when the request does not name one.
    #[serde(default)]
    pub default_style: ResponseStyle,
    /// Hard cap on answer length in characters, when set.
    #[serde(default)]
    pub max_answer_chars: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            generate_timeout_ms: default_generate_timeout_ms(),
            default_style: ResponseStyle::default(),
            max_answer_chars: None,
        }
    }
}

/// Default generation timeout in milliseconds.
fn default_generate_timeout_ms() -> u64 {
    120_000
}

/// Model service process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path to the service binary; discovered on PATH when unset.
    #[serde(default)]
    pub binary: Option<String>,
    /// Interval between heartbeat beacons, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Timeout for one embedding call, in milliseconds.
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,
    /// Concurrent embedding calls allowed inside the service.
    #[serde(default = "default_embed_parallelism")]
    pub embed_parallelism: usize,
    /// Address-space limit applied to the spawned process, in MB (unix
    /// only).
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            binary: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            embed_timeout_ms: default_embed_timeout_ms(),
            embed_parallelism: default_embed_parallelism(),
            max_memory_mb: None,
        }
    }
}

/// Default heartbeat cadence in milliseconds.
fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

/// Default embedding timeout in milliseconds.
fn default_embed_timeout_ms() -> u64 {
    10_000
}

/// Default concurrent embedding call limit.
fn default_embed_parallelism() -> usize {
    2
}

/// Recovery automation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Health poll interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive failures before a healthy process is marked degraded.
    #[serde(default = "default_degraded_after_failures")]
    pub degraded_after_failures: u32,
    /// Restart attempts allowed within the rolling window before fatal.
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
    /// Rolling window for counting restart attempts, in seconds.
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,
    /// Minimum dwell in cooldown before a process may be healthy again, in
    /// seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Bounded time for a restart to complete, in milliseconds.
    #[serde(default = "default_restart_grace_ms")]
    pub restart_grace_ms: u64,
    /// Timeout for one health probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Probe attempts during startup readiness gating.
    #[serde(default = "default_startup_probe_attempts")]
    pub startup_probe_attempts: u32,
    /// Memory high-water mark triggering LRU eviction, in MB; disabled when
    /// unset.
    #[serde(default)]
    pub memory_high_water_mb: Option<u64>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            degraded_after_failures: default_degraded_after_failures(),
            restart_limit: default_restart_limit(),
            restart_window_secs: default_restart_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            restart_grace_ms: default_restart_grace_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            startup_probe_attempts: default_startup_probe_attempts(),
            memory_high_water_mb: None,
        }
    }
}

/// Default health poll interval in milliseconds.
fn default_poll_interval_ms() -> u64 {
    2_000
}

/// Default consecutive-failure threshold for degradation.
fn default_degraded_after_failures() -> u32 {
    3
}

/// Default restart attempts before the fatal state.
fn default_restart_limit() -> u32 {
    3
}

/// Default rolling window for restart accounting, in seconds.
fn default_restart_window_secs() -> u64 {
    600
}

/// Default cooldown dwell in seconds.
fn default_cooldown_secs() -> u64 {
    30
}

/// Default bounded restart completion time in milliseconds.
fn default_restart_grace_ms() -> u64 {
    10_000
}

/// Default health probe timeout in milliseconds.
fn default_probe_timeout_ms() -> u64 {
    3_000
}

/// Default startup probe attempt count.
fn default_startup_probe_attempts() -> u32 {
    5
}
