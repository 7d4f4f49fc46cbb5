//! Model registry: lifecycle states, leases and LRU accounting.
//!
//! The registry owns every loaded engine. Callers never touch engines
//! directly; they acquire a [`ModelLease`] that pins the model in memory
//! until dropped. Eviction drains in-flight leases before the handle is
//! removed, and loading a GPU model first swaps out whichever GPU model
//! currently holds the device.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use counsel_config::{CounselConfig, GpuTierConfig};
use counsel_protocol::{DeviceClass, ModelDescriptor};
use log::{info, warn};
use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify};

use crate::device::{DeviceProbe, plan_gpu_layers};
use crate::engine::InferenceEngine;
use crate::error::ServiceError;
use crate::loader::{ModelLoader, ModelRole};

/// Lifecycle state of one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Evicting,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Evicting => "evicting",
        }
    }
}

/// One loaded model with usage accounting.
#[derive(Debug)]
pub struct ModelHandle {
    name: String,
    device: DeviceClass,
    gpu_layers: u32,
    engine: Arc<dyn InferenceEngine>,
    in_flight: AtomicUsize,
    last_used: AtomicU64,
    // notify_one; at most one drain waiter exists (lifecycle lock).
    drained: Notify,
}

impl ModelHandle {
    fn new(name: String, device: DeviceClass, gpu_layers: u32, engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            name,
            device,
            gpu_layers,
            engine,
            in_flight: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
            drained: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    pub fn gpu_layers(&self) -> u32 {
        self.gpu_layers
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::SeqCst)
    }

    fn begin_inference(&self, tick: u64) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.last_used.store(tick, Ordering::SeqCst);
    }

    fn finish_inference(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_one();
        }
    }
}

/// Pin on a loaded model; releases its in-flight slot on drop.
#[derive(Debug)]
pub struct ModelLease {
    handle: Arc<ModelHandle>,
}

impl Deref for ModelLease {
    type Target = ModelHandle;

    fn deref(&self) -> &ModelHandle {
        &self.handle
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.handle.finish_inference();
    }
}

/// Registry of catalog models with load, lease and evict operations.
pub struct ModelRegistry {
    catalog: HashMap<String, ModelDescriptor>,
    roles: HashMap<String, ModelRole>,
    gpu: GpuTierConfig,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn DeviceProbe>,
    states: RwLock<HashMap<String, ModelState>>,
    handles: RwLock<HashMap<String, Arc<ModelHandle>>>,
    // Serializes loads and evictions; never held across inference.
    lifecycle: Mutex<()>,
    clock: AtomicU64,
}

impl ModelRegistry {
    /// Build a registry from the configured catalog and role assignments.
    ///
    /// A name assigned to several roles keeps the first in embedding,
    /// utility, generation order.
    pub fn new(
        config: &CounselConfig,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        let catalog: HashMap<String, ModelDescriptor> = config
            .models
            .catalog
            .iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor.clone()))
            .collect();
        let mut roles = HashMap::new();
        roles
            .entry(config.models.embedding.clone())
            .or_insert(ModelRole::Embedding);
        roles
            .entry(config.models.utility.clone())
            .or_insert(ModelRole::Utility);
        roles
            .entry(config.models.generation.clone())
            .or_insert(ModelRole::Generation);
        Self {
            catalog,
            roles,
            gpu: config.models.gpu.clone(),
            loader,
            probe,
            states: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            clock: AtomicU64::new(0),
        }
    }

    /// Catalog entry for `name`, or `UnknownModel`.
    pub fn describe(&self, name: &str) -> Result<&ModelDescriptor, ServiceError> {
        self.catalog
            .get(name)
            .ok_or_else(|| ServiceError::UnknownModel(name.to_string()))
    }

    /// Current lifecycle state; a name the registry never touched is
    /// `Unloaded`.
    pub fn state(&self, name: &str) -> ModelState {
        self.states
            .read()
            .get(name)
            .copied()
            .unwrap_or(ModelState::Unloaded)
    }

    /// Names of loaded models, least recently used first.
    pub fn list_loaded(&self) -> Vec<String> {
        let handles = self.handles.read();
        let mut loaded: Vec<(u64, String)> = handles
            .values()
            .map(|handle| (handle.last_used(), handle.name().to_string()))
            .collect();
        loaded.sort_by_key(|(tick, _)| *tick);
        loaded.into_iter().map(|(_, name)| name).collect()
    }

    /// Lease `name`, loading it first when cold.
    ///
    /// A cold GPU load swaps out every other loaded GPU model and waits for
    /// their in-flight work to drain. Callers therefore hold at most one
    /// lease at a time; a second concurrent acquire can deadlock against
    /// that drain.
    pub async fn acquire(&self, name: &str) -> Result<ModelLease, ServiceError> {
        if self.state(name) == ModelState::Ready {
            if let Some(handle) = self.handles.read().get(name) {
                return Ok(self.lease(Arc::clone(handle)));
            }
        }

        let _guard = self.lifecycle.lock().await;
        if let Some(handle) = self.handles.read().get(name) {
            return Ok(self.lease(Arc::clone(handle)));
        }

        let descriptor = self.describe(name)?;
        let role = self.roles.get(name).copied().ok_or_else(|| {
            ServiceError::InvalidRequest(format!("model has no configured role: {name}"))
        })?;
        self.states
            .write()
            .insert(name.to_string(), ModelState::Loading);

        if descriptor.device == DeviceClass::Gpu {
            self.evict_other_gpu_locked(name).await;
        }

        let available_mb = self.probe.available_mb();
        if descriptor.memory_cost_mb > available_mb {
            warn!(
                "refusing model load (name={}, need_mb={}, available_mb={})",
                name, descriptor.memory_cost_mb, available_mb
            );
            self.states
                .write()
                .insert(name.to_string(), ModelState::Unloaded);
            return Err(ServiceError::ModelLoad {
                model: name.to_string(),
                reason: format!(
                    "insufficient memory: need {} MB, {} MB available",
                    descriptor.memory_cost_mb, available_mb
                ),
            });
        }

        let gpu_layers = plan_gpu_layers(descriptor, &self.gpu, available_mb);
        match self.loader.load(descriptor, role, gpu_layers).await {
            Ok(engine) => {
                let handle = Arc::new(ModelHandle::new(
                    name.to_string(),
                    descriptor.device,
                    gpu_layers,
                    engine,
                ));
                self.handles
                    .write()
                    .insert(name.to_string(), Arc::clone(&handle));
                self.states
                    .write()
                    .insert(name.to_string(), ModelState::Ready);
                Ok(self.lease(handle))
            }
            Err(err) => {
                self.states
                    .write()
                    .insert(name.to_string(), ModelState::Unloaded);
                Err(err)
            }
        }
    }

    /// Unload `name` after draining its in-flight leases. Returns whether a
    /// loaded model was actually removed.
    pub async fn evict(&self, name: &str) -> bool {
        let _guard = self.lifecycle.lock().await;
        self.evict_locked(name).await
    }

    // Callers hold the lifecycle lock.
    async fn evict_locked(&self, name: &str) -> bool {
        let Some(handle) = self.handles.read().get(name).map(Arc::clone) else {
            return false;
        };
        self.states
            .write()
            .insert(name.to_string(), ModelState::Evicting);
        while handle.in_flight() > 0 {
            handle.drained.notified().await;
        }
        self.handles.write().remove(name);
        self.states
            .write()
            .insert(name.to_string(), ModelState::Unloaded);
        info!("evicted model (name={name})");
        true
    }

    // Callers hold the lifecycle lock.
    async fn evict_other_gpu_locked(&self, keep: &str) {
        let victims: Vec<String> = self
            .handles
            .read()
            .values()
            .filter(|handle| handle.device() == DeviceClass::Gpu && handle.name() != keep)
            .map(|handle| handle.name().to_string())
            .collect();
        for victim in victims {
            self.evict_locked(&victim).await;
        }
    }

    fn lease(&self, handle: Arc<ModelHandle>) -> ModelLease {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        handle.begin_inference(tick);
        ModelLease { handle }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("catalog", &self.catalog.keys())
            .field("loaded", &self.list_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FixedProbe;
    use crate::loader::DeterministicLoader;
    use counsel_config::ModelsConfig;
    use pretty_assertions::assert_eq;

    fn weights(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(format!("{name}.gguf"));
        std::fs::write(&path, b"stub").expect("write weights");
        path
    }

    fn descriptor(
        dir: &tempfile::TempDir,
        name: &str,
        device: DeviceClass,
        memory_cost_mb: u64,
    ) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            path: weights(dir, name),
            device,
            memory_cost_mb,
            max_gpu_layers: 32,
        }
    }

    fn registry_with(
        catalog: Vec<ModelDescriptor>,
        models: ModelsConfig,
        available_mb: u64,
    ) -> ModelRegistry {
        let config = CounselConfig::builder()
            .models(ModelsConfig { catalog, ..models })
            .build();
        ModelRegistry::new(
            &config,
            Arc::new(DeterministicLoader::new(16)),
            Arc::new(FixedProbe {
                available_mb,
                rss_mb: 128,
            }),
        )
    }

    fn default_registry(dir: &tempfile::TempDir, available_mb: u64) -> ModelRegistry {
        let catalog = vec![
            descriptor(dir, "embedder", DeviceClass::Cpu, 256),
            descriptor(dir, "utility", DeviceClass::Cpu, 256),
            descriptor(dir, "reasoner", DeviceClass::Gpu, 1024),
        ];
        registry_with(catalog, ModelsConfig::default(), available_mb)
    }

    #[tokio::test]
    async fn unknown_models_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(&dir, 8192);
        let err = registry.acquire("mystery").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::UnknownModel(ref name) if name == "mystery"));
    }

    #[tokio::test]
    async fn catalog_entries_without_a_role_cannot_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = vec![
            descriptor(&dir, "embedder", DeviceClass::Cpu, 256),
            descriptor(&dir, "spare", DeviceClass::Cpu, 256),
        ];
        let registry = registry_with(catalog, ModelsConfig::default(), 8192);
        let err = registry.acquire("spare").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn acquire_walks_a_model_from_unloaded_to_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(&dir, 8192);
        assert_eq!(registry.state("embedder"), ModelState::Unloaded);

        let lease = registry.acquire("embedder").await.expect("acquire");
        assert_eq!(registry.state("embedder"), ModelState::Ready);
        assert_eq!(lease.name(), "embedder");
        assert_eq!(lease.in_flight(), 1);
        drop(lease);

        assert_eq!(registry.state("embedder"), ModelState::Ready);
        assert_eq!(registry.list_loaded(), vec!["embedder".to_string()]);
    }

    #[tokio::test]
    async fn admission_fails_when_memory_is_short() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(&dir, 100);
        let err = registry.acquire("embedder").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::ModelLoad { ref model, .. } if model == "embedder"));
        assert_eq!(registry.state("embedder"), ModelState::Unloaded);
    }

    #[tokio::test]
    async fn loaded_models_list_least_recently_used_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(&dir, 8192);
        drop(registry.acquire("embedder").await.expect("acquire"));
        drop(registry.acquire("utility").await.expect("acquire"));
        drop(registry.acquire("embedder").await.expect("acquire"));
        assert_eq!(
            registry.list_loaded(),
            vec!["utility".to_string(), "embedder".to_string()]
        );
    }

    #[tokio::test]
    async fn eviction_unloads_and_reports_prior_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(&dir, 8192);
        drop(registry.acquire("embedder").await.expect("acquire"));

        assert!(registry.evict("embedder").await);
        assert_eq!(registry.state("embedder"), ModelState::Unloaded);
        assert!(registry.list_loaded().is_empty());
        assert!(!registry.evict("embedder").await);
    }

    #[tokio::test]
    async fn a_cold_gpu_load_swaps_out_the_resident_gpu_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = vec![
            descriptor(&dir, "embedder", DeviceClass::Cpu, 256),
            descriptor(&dir, "gpu-scorer", DeviceClass::Gpu, 1024),
            descriptor(&dir, "gpu-reasoner", DeviceClass::Gpu, 1024),
        ];
        let models = ModelsConfig {
            utility: "gpu-scorer".to_string(),
            generation: "gpu-reasoner".to_string(),
            ..ModelsConfig::default()
        };
        let registry = registry_with(catalog, models, 16_384);

        drop(registry.acquire("gpu-scorer").await.expect("acquire"));
        drop(registry.acquire("embedder").await.expect("acquire"));
        drop(registry.acquire("gpu-reasoner").await.expect("acquire"));

        assert_eq!(registry.state("gpu-scorer"), ModelState::Unloaded);
        assert_eq!(registry.state("gpu-reasoner"), ModelState::Ready);
        assert_eq!(registry.state("embedder"), ModelState::Ready);
    }

    #[tokio::test]
    async fn gpu_layers_follow_the_configured_tiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = default_registry(&dir, 5_000);
        let lease = registry.acquire("reasoner").await.expect("acquire");
        assert_eq!(lease.gpu_layers(), 16);
        let cpu = registry.acquire("embedder").await.expect("acquire");
        assert_eq!(cpu.gpu_layers(), 0);
    }
}
