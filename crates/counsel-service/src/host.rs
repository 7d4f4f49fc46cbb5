//! Request dispatch for the model service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use counsel_config::CounselConfig;
use counsel_protocol::{
    DeviceClass, GenerationParams, Heartbeat, HealthProbe, ServiceReply, ServiceRequest,
};
use log::warn;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::device::DeviceProbe;
use crate::error::ServiceError;
use crate::registry::ModelRegistry;

/// Executes service requests against the model registry.
///
/// Inference concurrency is bounded here: one GPU operation at a time and a
/// configured number of parallel embedding calls. CPU-only operations run
/// unbounded.
pub struct ServiceHost {
    config: Arc<CounselConfig>,
    registry: Arc<ModelRegistry>,
    probe: Arc<dyn DeviceProbe>,
    // Semaphores are never closed; acquire cannot fail.
    gpu_slot: Semaphore,
    embed_slots: Semaphore,
    started: Instant,
    stopping: AtomicBool,
}

impl ServiceHost {
    pub fn new(
        config: Arc<CounselConfig>,
        registry: Arc<ModelRegistry>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        let embed_parallelism = config.service.embed_parallelism.max(1);
        Self {
            config,
            registry,
            probe,
            gpu_slot: Semaphore::new(1),
            embed_slots: Semaphore::new(embed_parallelism),
            started: Instant::now(),
            stopping: AtomicBool::new(false),
        }
    }

    /// Answer one request; failures become `ServiceReply::Error` so the
    /// caller always gets a reply for its envelope.
    pub async fn handle(&self, request: ServiceRequest) -> ServiceReply {
        match self.dispatch(request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("request failed (error={err})");
                ServiceReply::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        }
    }

    async fn dispatch(&self, request: ServiceRequest) -> Result<ServiceReply, ServiceError> {
        if self.is_stopping() && !matches!(request, ServiceRequest::Health) {
            return Err(ServiceError::InvalidRequest(
                "service is shutting down".to_string(),
            ));
        }
        match request {
            ServiceRequest::Embed { text } => self.embed(&text).await,
            ServiceRequest::Score { question, chunks } => self.score(&question, &chunks).await,
            ServiceRequest::Generate { prompt, params } => self.generate(&prompt, &params).await,
            ServiceRequest::Health => Ok(ServiceReply::Health {
                probe: self.health(),
            }),
            ServiceRequest::Evict { model } => {
                let was_loaded = self.registry.evict(&model).await;
                Ok(ServiceReply::Evicted { model, was_loaded })
            }
            ServiceRequest::Shutdown => {
                self.stopping.store(true, Ordering::SeqCst);
                Ok(ServiceReply::ShuttingDown)
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<ServiceReply, ServiceError> {
        let _slot = self.embed_slots.acquire().await.ok();
        let lease = self.registry.acquire(&self.config.models.embedding).await?;
        let _gpu = self.gpu_permit_for(lease.device()).await;
        let vector = lease.engine().embed(text).await?;
        Ok(ServiceReply::Embedding {
            vector,
            model: lease.name().to_string(),
        })
    }

    async fn score(
        &self,
        question: &str,
        chunks: &[String],
    ) -> Result<ServiceReply, ServiceError> {
        if chunks.is_empty() {
            return Ok(ServiceReply::Scores {
                scores: Vec::new(),
                model: self.config.models.utility.clone(),
            });
        }
        let lease = self.registry.acquire(&self.config.models.utility).await?;
        let _gpu = self.gpu_permit_for(lease.device()).await;
        let scores = lease.engine().score(question, chunks).await?;
        Ok(ServiceReply::Scores {
            scores,
            model: lease.name().to_string(),
        })
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ServiceReply, ServiceError> {
        let lease = self.registry.acquire(&self.config.models.generation).await?;
        let _gpu = self.gpu_permit_for(lease.device()).await;
        let text = lease.engine().generate(prompt, params).await?;
        Ok(ServiceReply::Generated {
            text,
            model: lease.name().to_string(),
        })
    }

    async fn gpu_permit_for(&self, device: DeviceClass) -> Option<SemaphorePermit<'_>> {
        if device == DeviceClass::Gpu {
            self.gpu_slot.acquire().await.ok()
        } else {
            None
        }
    }

    /// Health probe for the supervisor's poll loop.
    pub fn health(&self) -> HealthProbe {
        HealthProbe {
            ready: !self.is_stopping(),
            loaded_models: self.registry.list_loaded(),
            memory: self.probe.snapshot(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Heartbeat beacon with the given sequence number.
    pub fn heartbeat(&self, seq: u64) -> Heartbeat {
        Heartbeat {
            seq,
            created_at: Utc::now(),
            loaded_models: self.registry.list_loaded(),
            memory: self.probe.snapshot(),
        }
    }

    /// Configured heartbeat cadence, clamped away from zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.config.service.heartbeat_interval_ms.max(1))
    }

    /// Whether a shutdown request has been accepted.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("registry", &self.registry)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
