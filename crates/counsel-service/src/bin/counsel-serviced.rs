//! Model service process: line protocol on stdin/stdout, logs on stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use counsel_config::{CounselConfig, LayeredConfigOptions};
use counsel_service::{
    DEFAULT_EMBEDDING_DIMENSIONS, DeterministicLoader, DeviceProbe, ModelRegistry, ServiceHost,
    SystemProbe, stdio,
};
use log::info;

#[derive(Debug, Parser)]
#[command(name = "counsel-serviced", about = "Counsel model service process")]
struct Cli {
    /// Config file applied as a runtime override; repeatable, later wins.
    #[arg(long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,

    /// Embedding vector width; must match the width the index was built
    /// with.
    #[arg(long, value_name = "DIMS")]
    dimensions: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;

    let mut options = LayeredConfigOptions::new(&cwd);
    for path in &cli.config {
        options = options.with_runtime_path(path);
    }
    let layered = CounselConfig::load_layered_with_options(options)
        .context("failed to load config")?;
    for layer in &layered.layers {
        info!(
            "config layer (source={:?}, path={})",
            layer.source,
            layer
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string())
        );
    }
    let config = Arc::new(layered.config);

    let probe: Arc<dyn DeviceProbe> = Arc::new(SystemProbe::new());
    let dimensions = cli.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
    let loader = Arc::new(DeterministicLoader::new(dimensions));
    let registry = Arc::new(ModelRegistry::new(&config, loader, Arc::clone(&probe)));
    let host = Arc::new(ServiceHost::new(config, registry, probe));

    info!(
        "service ready (pid={}, embedding_dimensions={})",
        std::process::id(),
        dimensions
    );
    stdio::serve(host).await;
    info!("service stopped");
    Ok(())
}
