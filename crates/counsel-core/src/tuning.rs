//! Hot-reloadable analysis knobs.

use counsel_config::AnalysisConfig;
use log::info;
use parking_lot::RwLock;
use std::sync::Arc;

/// Analysis parameters that may change while the system is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    /// Minimum relevance a chunk needs to survive filtering.
    pub relevance_threshold: f32,
    /// Whether the utility model scores chunks at all.
    pub utility_enabled: bool,
}

/// Shared handle to the current tuning, readable from any task.
#[derive(Clone)]
pub struct SharedTuning {
    inner: Arc<RwLock<Tuning>>,
}

impl SharedTuning {
    /// Seed tuning from the analysis config section.
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Tuning {
                relevance_threshold: config.relevance_threshold,
                utility_enabled: config.utility_enabled,
            })),
        }
    }

    /// Copy of the current tuning values.
    pub fn snapshot(&self) -> Tuning {
        *self.inner.read()
    }

    /// Replace the current tuning values.
    pub fn update(&self, tuning: Tuning) {
        info!(
            "tuning updated (relevance_threshold={}, utility_enabled={})",
            tuning.relevance_threshold, tuning.utility_enabled
        );
        *self.inner.write() = tuning;
    }
}
