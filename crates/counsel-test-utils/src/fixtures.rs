use counsel_config::{
    AnalysisConfig, CounselConfig, GenerationConfig, ModelsConfig, RecoveryConfig, RetrievalConfig,
    ServiceConfig,
};
use counsel_index::Chunk;
use counsel_protocol::{DeviceClass, ModelDescriptor};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A full config with timeouts and dwell times shrunk so recovery and
/// deadline paths finish within a test run.
pub fn test_config() -> CounselConfig {
    CounselConfig::builder()
        .models(ModelsConfig {
            catalog: vec![
                descriptor("embedder", DeviceClass::Cpu),
                descriptor("utility", DeviceClass::Cpu),
                descriptor("reasoner", DeviceClass::Cpu),
            ],
            ..ModelsConfig::default()
        })
        .retrieval(RetrievalConfig {
            index_path: None,
            max_chunks: 5,
        })
        .analysis(AnalysisConfig {
            utility_enabled: true,
            relevance_threshold: 0.3,
            score_timeout_ms: 200,
        })
        .generation(GenerationConfig {
            generate_timeout_ms: 200,
            ..GenerationConfig::default()
        })
        .service(ServiceConfig {
            binary: None,
            heartbeat_interval_ms: 50,
            embed_timeout_ms: 200,
            embed_parallelism: 2,
            max_memory_mb: None,
        })
        .recovery(RecoveryConfig {
            poll_interval_ms: 10,
            degraded_after_failures: 3,
            restart_limit: 3,
            restart_window_secs: 600,
            cooldown_secs: 0,
            restart_grace_ms: 0,
            probe_timeout_ms: 200,
            startup_probe_attempts: 3,
            memory_high_water_mb: None,
        })
        .build()
}

/// A catalog entry pointing at a path that does not need to exist.
pub fn descriptor(name: &str, device: DeviceClass) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        path: format!("models/{name}.gguf").into(),
        device,
        memory_cost_mb: 1024,
        max_gpu_layers: 32,
    }
}

/// Three chunks whose embeddings give distinct similarities against the
/// query `[1, 0, 0]`: 1.0, 0.6, and 0.0 in document order.
pub fn contract_chunks() -> Vec<Chunk> {
    vec![
        Chunk::new(
            "employment-contract",
            "The notice period is thirty days from written notification.",
            vec![1.0, 0.0, 0.0],
        ),
        Chunk::new(
            "employee-handbook",
            "Vacation days accrue at a rate of two per month of service.",
            vec![0.6, 0.8, 0.0],
        ),
        Chunk::new(
            "office-manual",
            "The espresso machine is descaled on the first Friday of each month.",
            vec![0.0, 0.0, 1.0],
        ),
    ]
}

/// Write chunks as line-delimited JSON at `path`, the on-disk index format.
pub fn write_index_jsonl(path: &Path, chunks: &[Chunk]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for chunk in chunks {
        let line = serde_json::to_string(chunk).map_err(std::io::Error::other)?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()
}
