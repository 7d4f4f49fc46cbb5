//! Model loading: role-aware construction of inference engines.

use async_trait::async_trait;
use counsel_protocol::ModelDescriptor;
use log::info;
use std::fmt::Debug;
use std::sync::Arc;

use crate::engine::{HashEmbedder, InferenceEngine, OverlapScorer, TemplateGenerator};
use crate::error::ServiceError;

/// Serving role a model is loaded for; decides which engine backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Embedding,
    Utility,
    Generation,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Embedding => "embedding",
            ModelRole::Utility => "utility",
            ModelRole::Generation => "generation",
        }
    }
}

/// Turns a catalog descriptor into a ready engine.
#[async_trait]
pub trait ModelLoader: Send + Sync + Debug {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        role: ModelRole,
        gpu_layers: u32,
    ) -> Result<Arc<dyn InferenceEngine>, ServiceError>;
}

/// Embedding width used when no override is configured.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Loader backing every role with the deterministic engines.
///
/// Loads still demand that the descriptor's weight file exists, so missing
/// or misconfigured model paths surface exactly as they would with a real
/// inference backend.
#[derive(Debug)]
pub struct DeterministicLoader {
    dimensions: usize,
}

impl DeterministicLoader {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for DeterministicLoader {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl ModelLoader for DeterministicLoader {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        role: ModelRole,
        gpu_layers: u32,
    ) -> Result<Arc<dyn InferenceEngine>, ServiceError> {
        if !descriptor.path.exists() {
            return Err(ServiceError::ModelLoad {
                model: descriptor.name.clone(),
                reason: format!("weights not found at {}", descriptor.path.display()),
            });
        }
        info!(
            "loading model (name={}, role={}, gpu_layers={})",
            descriptor.name,
            role.as_str(),
            gpu_layers
        );
        let engine: Arc<dyn InferenceEngine> = match role {
            ModelRole::Embedding => {
                Arc::new(HashEmbedder::new(descriptor.name.as_str(), self.dimensions))
            }
            ModelRole::Utility => Arc::new(OverlapScorer::new(descriptor.name.as_str())),
            ModelRole::Generation => Arc::new(TemplateGenerator::new(descriptor.name.as_str())),
        };
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_protocol::DeviceClass;
    use std::io::Write;

    fn descriptor_at(path: &std::path::Path) -> ModelDescriptor {
        ModelDescriptor {
            name: "embedder".to_string(),
            path: path.to_path_buf(),
            device: DeviceClass::Cpu,
            memory_cost_mb: 256,
            max_gpu_layers: 0,
        }
    }

    #[tokio::test]
    async fn missing_weights_fail_the_load() {
        let loader = DeterministicLoader::default();
        let descriptor = descriptor_at(std::path::Path::new("/nonexistent/weights.gguf"));
        let err = loader
            .load(&descriptor, ModelRole::Embedding, 0)
            .await
            .expect_err("load must fail");
        assert!(matches!(err, ServiceError::ModelLoad { ref model, .. } if model == "embedder"));
    }

    #[tokio::test]
    async fn present_weights_load_an_engine_for_the_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        let weights = dir.path().join("embedder.gguf");
        let mut file = std::fs::File::create(&weights).expect("create weights");
        file.write_all(b"stub").expect("write weights");

        let loader = DeterministicLoader::new(32);
        let engine = loader
            .load(&descriptor_at(&weights), ModelRole::Embedding, 0)
            .await
            .expect("load");
        assert_eq!(engine.model_name(), "embedder");
        let vector = engine.embed("hello world").await.expect("embed");
        assert_eq!(vector.len(), 32);
    }
}
