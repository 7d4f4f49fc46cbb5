//! Concurrency behavior of the model registry: GPU exclusivity, lease
//! draining and shared cold loads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use counsel_config::{CounselConfig, ModelsConfig};
use counsel_protocol::{DeviceClass, ModelDescriptor};
use counsel_service::{
    DeterministicLoader, FixedProbe, InferenceEngine, ModelLoader, ModelRegistry, ModelRole,
    ModelState, ServiceError,
};
use pretty_assertions::assert_eq;

fn descriptor(dir: &tempfile::TempDir, name: &str, device: DeviceClass) -> ModelDescriptor {
    let path = dir.path().join(format!("{name}.gguf"));
    std::fs::write(&path, b"stub").expect("write weights");
    ModelDescriptor {
        name: name.to_string(),
        path,
        device,
        memory_cost_mb: 512,
        max_gpu_layers: 32,
    }
}

fn gpu_registry(dir: &tempfile::TempDir) -> Arc<ModelRegistry> {
    let config = CounselConfig::builder()
        .models(ModelsConfig {
            catalog: vec![
                descriptor(dir, "embedder", DeviceClass::Cpu),
                descriptor(dir, "gpu-scorer", DeviceClass::Gpu),
                descriptor(dir, "gpu-reasoner", DeviceClass::Gpu),
            ],
            utility: "gpu-scorer".to_string(),
            generation: "gpu-reasoner".to_string(),
            ..ModelsConfig::default()
        })
        .build();
    Arc::new(ModelRegistry::new(
        &config,
        Arc::new(DeterministicLoader::new(16)),
        Arc::new(FixedProbe {
            available_mb: 16_384,
            rss_mb: 256,
        }),
    ))
}

#[tokio::test]
async fn a_gpu_load_waits_for_inflight_gpu_work_to_drain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = gpu_registry(&dir);

    let scorer_lease = registry.acquire("gpu-scorer").await.expect("acquire scorer");
    let task = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move {
            let lease = registry.acquire("gpu-reasoner").await.expect("acquire reasoner");
            lease.name().to_string()
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished(), "swap must wait for the in-flight lease");

    drop(scorer_lease);
    let loaded = task.await.expect("join");
    assert_eq!(loaded, "gpu-reasoner");
    assert_eq!(registry.state("gpu-scorer"), ModelState::Unloaded);
    assert_eq!(registry.state("gpu-reasoner"), ModelState::Ready);
    assert_eq!(registry.list_loaded(), vec!["gpu-reasoner".to_string()]);
}

#[tokio::test]
async fn eviction_waits_for_inflight_leases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = gpu_registry(&dir);

    let lease = registry.acquire("embedder").await.expect("acquire");
    let task = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.evict("embedder").await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished(), "evict must wait for the lease");

    drop(lease);
    assert!(task.await.expect("join"));
    assert_eq!(registry.state("embedder"), ModelState::Unloaded);
}

#[tokio::test]
async fn warm_leases_on_one_model_overlap_freely() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = gpu_registry(&dir);

    let first = registry.acquire("embedder").await.expect("acquire");
    let second = registry.acquire("embedder").await.expect("acquire");
    assert_eq!(first.in_flight(), 2);
    drop(first);
    assert_eq!(second.in_flight(), 1);
    drop(second);
}

#[derive(Debug)]
struct CountingLoader {
    inner: DeterministicLoader,
    loads: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ModelLoader for CountingLoader {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        role: ModelRole,
        gpu_layers: u32,
    ) -> Result<Arc<dyn InferenceEngine>, ServiceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(descriptor, role, gpu_layers).await
    }
}

#[tokio::test]
async fn concurrent_cold_acquires_share_one_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loads = Arc::new(AtomicUsize::new(0));
    let config = CounselConfig::builder()
        .models(ModelsConfig {
            catalog: vec![descriptor(&dir, "embedder", DeviceClass::Cpu)],
            ..ModelsConfig::default()
        })
        .build();
    let registry = Arc::new(ModelRegistry::new(
        &config,
        Arc::new(CountingLoader {
            inner: DeterministicLoader::new(16),
            loads: Arc::clone(&loads),
        }),
        Arc::new(FixedProbe {
            available_mb: 16_384,
            rss_mb: 256,
        }),
    ));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            let lease = registry.acquire("embedder").await.expect("acquire");
            lease.name().to_string()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("join"), "embedder");
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(registry.list_loaded(), vec!["embedder".to_string()]);
}
