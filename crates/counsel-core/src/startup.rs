//! Startup sequencing and the running system handle.
//!
//! Order: validate the model catalog (metadata only, weights load lazily),
//! open the vector index, launch the service process, probe readiness with
//! bounded backoff, then start the recovery automation. The returned
//! `CounselSystem` is the one handle callers keep.

use crate::error::CounselCoreError;
use crate::events::LogEventSink;
use crate::health::HealthBoard;
use crate::orchestrator::ConsultOrchestrator;
use crate::recovery::{RecoveryAutomation, RecoveryHandle};
use crate::service::{ChildProcessTransport, ModelServiceClient};
use crate::tuning::SharedTuning;
use counsel_config::CounselConfig;
use counsel_index::{InMemoryVectorIndex, VectorIndex};
use counsel_protocol::{
    ConsultationRequest, ConsultationResponse, EventSink, MemorySnapshot, ProcessReport,
    ProcessStatus, ServiceTransport, SystemStatus,
};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Name the service process is supervised under.
pub const SERVICE_PROCESS: &str = "model-service";

/// Binary name looked up on PATH when the config names no service binary.
pub const SERVICE_BINARY: &str = "counsel-serviced";

/// First startup probe delay; doubles per attempt.
const PROBE_BACKOFF_START: Duration = Duration::from_millis(100);

/// Assembles and starts a `CounselSystem`.
pub struct StartupCoordinator {
    config: Arc<CounselConfig>,
    transport: Option<Arc<dyn ServiceTransport>>,
    index: Option<Arc<dyn VectorIndex>>,
    events: Option<Arc<dyn EventSink>>,
    service_args: Vec<String>,
}

impl StartupCoordinator {
    pub fn new(config: CounselConfig) -> Self {
        Self {
            config: Arc::new(config),
            transport: None,
            index: None,
            events: None,
            service_args: Vec::new(),
        }
    }

    /// Use this transport instead of spawning the service binary. Embedded
    /// and test setups inject their channel here.
    pub fn with_transport(mut self, transport: Arc<dyn ServiceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use this index instead of opening the configured one.
    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Receive pipeline events on this sink instead of the log sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Arguments forwarded to the spawned service binary, typically the
    /// `--config` flags so the child resolves the same layered config.
    pub fn with_service_args(mut self, args: Vec<String>) -> Self {
        self.service_args = args;
        self
    }

    /// Run the startup sequence to a ready system.
    pub async fn start(self) -> Result<CounselSystem, CounselCoreError> {
        let config = Arc::clone(&self.config);
        validate_catalog(&config)?;

        let index: Arc<dyn VectorIndex> = match self.index {
            Some(index) => index,
            None => Arc::new(open_index(&config)?),
        };

        let transport: Arc<dyn ServiceTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                let binary = resolve_service_binary(config.service.binary.as_deref())?;
                Arc::new(
                    ChildProcessTransport::launch(
                        binary,
                        self.service_args.clone(),
                        config.service.max_memory_mb,
                    )
                    .await?,
                )
            }
        };

        let board = HealthBoard::new();
        let health = board.register(SERVICE_PROCESS);
        let client = Arc::new(ModelServiceClient::new(
            Arc::clone(&transport),
            Arc::clone(&config),
            Arc::clone(&health),
        ));

        wait_until_ready(&client, config.recovery.startup_probe_attempts).await?;

        let tuning = SharedTuning::new(&config.analysis);
        let events = self.events.unwrap_or_else(|| Arc::new(LogEventSink));
        let orchestrator = ConsultOrchestrator::new(
            Arc::clone(&client),
            index,
            Arc::clone(&config),
            tuning.clone(),
            events,
        );

        let recovery = RecoveryAutomation::new(
            Arc::clone(&client),
            Arc::clone(&transport),
            health,
            Arc::clone(&config),
        )
        .start();

        info!("counsel system ready");
        Ok(CounselSystem {
            config,
            client,
            orchestrator,
            board,
            tuning,
            transport,
            recovery: Some(recovery),
        })
    }
}

/// A started system: the consultation pipeline plus its supervision.
pub struct CounselSystem {
    config: Arc<CounselConfig>,
    client: Arc<ModelServiceClient>,
    orchestrator: ConsultOrchestrator,
    board: HealthBoard,
    tuning: SharedTuning,
    transport: Arc<dyn ServiceTransport>,
    recovery: Option<RecoveryHandle>,
}

impl std::fmt::Debug for CounselSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounselSystem").finish_non_exhaustive()
    }
}

impl CounselSystem {
    /// Answer one question against the indexed documents.
    pub async fn consult(
        &self,
        request: ConsultationRequest,
    ) -> Result<ConsultationResponse, CounselCoreError> {
        self.orchestrator.consult(request).await
    }

    /// Handle for the hot-reloadable analysis knobs.
    pub fn tuning(&self) -> SharedTuning {
        self.tuning.clone()
    }

    /// Point-in-time status of every supervised process.
    ///
    /// `ready` means the embedding path is reachable and some answer path
    /// exists; degraded fallback counts, fatal does not.
    pub fn status(&self) -> SystemStatus {
        let window = Duration::from_secs(self.config.recovery.restart_window_secs);
        let heartbeat = self.transport.last_heartbeat();
        let (loaded, memory) = match &heartbeat {
            Some(beat) => (beat.loaded_models.clone(), beat.memory),
            None => (Vec::new(), MemorySnapshot::default()),
        };
        let processes: Vec<ProcessReport> = self
            .board
            .list()
            .into_iter()
            .map(|record| record.report(loaded.clone(), memory, window))
            .collect();
        let fatal = processes
            .iter()
            .any(|process| process.status == ProcessStatus::Fatal);
        SystemStatus {
            ready: self.transport.is_alive() && !fatal,
            processes,
        }
    }

    /// Stop supervision, ask the service to exit, and tear down.
    pub async fn shutdown(mut self) {
        info!("counsel system shutting down");
        if let Some(recovery) = self.recovery.take() {
            recovery.stop().await;
        }
        if let Err(err) = self.client.shutdown_service().await {
            warn!("service shutdown request failed (error={})", err);
        }
        info!("counsel system stopped");
    }
}

/// Catalog sanity: roles must resolve and weight paths should exist.
/// Weights themselves are never touched here; loading is lazy.
fn validate_catalog(config: &CounselConfig) -> Result<(), CounselCoreError> {
    if config.models.catalog.is_empty() {
        return Err(CounselCoreError::Startup(
            "model catalog is empty".to_string(),
        ));
    }
    if config.embedding_descriptor().is_none() {
        return Err(CounselCoreError::Startup(format!(
            "embedding role references unknown catalog entry: {}",
            config.models.embedding
        )));
    }
    if config.generation_descriptor().is_none() {
        return Err(CounselCoreError::Startup(format!(
            "generation role references unknown catalog entry: {}",
            config.models.generation
        )));
    }
    if config.utility_descriptor().is_none() {
        warn!(
            "utility role has no catalog entry, scoring will fall back (role={})",
            config.models.utility
        );
    }
    for descriptor in &config.models.catalog {
        if !descriptor.path.exists() {
            warn!(
                "model weights missing at startup (model={}, path={})",
                descriptor.name,
                descriptor.path.display()
            );
        }
    }
    Ok(())
}

fn open_index(config: &CounselConfig) -> Result<InMemoryVectorIndex, CounselCoreError> {
    match &config.retrieval.index_path {
        Some(path) => Ok(InMemoryVectorIndex::load_jsonl(path)?),
        None => {
            warn!("no index path configured, starting with an empty index");
            Ok(InMemoryVectorIndex::new())
        }
    }
}

/// Locate the service binary from config or PATH.
fn resolve_service_binary(configured: Option<&str>) -> Result<PathBuf, CounselCoreError> {
    match configured {
        Some(path) => {
            let path = PathBuf::from(path);
            if path.exists() {
                Ok(path)
            } else {
                Err(CounselCoreError::Startup(format!(
                    "service binary not found: {}",
                    path.display()
                )))
            }
        }
        None => which::which(SERVICE_BINARY).map_err(|err| {
            CounselCoreError::Startup(format!("service binary not on PATH ({SERVICE_BINARY}): {err}"))
        }),
    }
}

/// Probe until the service reports ready, backing off between attempts.
async fn wait_until_ready(
    client: &ModelServiceClient,
    attempts: u32,
) -> Result<(), CounselCoreError> {
    let attempts = attempts.max(1);
    let mut backoff = PROBE_BACKOFF_START;
    for attempt in 1..=attempts {
        match client.health_probe().await {
            Ok(probe) if probe.ready => {
                info!("service ready (attempt={})", attempt);
                return Ok(());
            }
            Ok(_) => debug!("service not ready yet (attempt={})", attempt),
            Err(err) => debug!("startup probe failed (attempt={}, error={})", attempt, err),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
    Err(CounselCoreError::Startup(format!(
        "service did not become ready after {attempts} probes"
    )))
}
