//! Command-line client for the Counsel supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use counsel_config::{CounselConfig, LayeredConfigOptions};
use counsel_core::{CounselSystem, StartupCoordinator};
use counsel_protocol::{
    ConsultationRequest, ConsultationResponse, ResponseStyle, ServiceTransport, SystemStatus,
};
use counsel_service::{
    DeterministicLoader, DeviceProbe, InProcessTransport, ModelRegistry, ServiceHost, SystemProbe,
};
use log::{debug, info};

/// Command-line options for the Counsel client.
#[derive(Debug, Parser)]
#[command(name = "counsel", version, about = "Consultation over locally indexed documents")]
struct Cli {
    /// Config file applied as a runtime override; repeatable, later wins.
    #[arg(long = "config", value_name = "PATH")]
    config: Vec<PathBuf>,
    /// Run the model service inside this process instead of spawning it.
    #[arg(long)]
    embedded: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask one question against the indexed documents.
    Ask {
        /// The question to consult on.
        question: String,
        /// Answer style: concise, detailed or technical.
        #[arg(long)]
        style: Option<String>,
        /// Maximum chunks to retrieve for this question.
        #[arg(long)]
        max_chunks: Option<usize>,
        /// Minimum relevance score a chunk needs to survive filtering.
        #[arg(long)]
        min_relevance: Option<f32>,
        /// Leave source references out of the response.
        #[arg(long)]
        no_sources: bool,
        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show supervision status for the model service.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Entry point for the Counsel CLI.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    info!(
        "starting counsel (cwd={}, embedded={}, config_overrides={})",
        cwd.display(),
        cli.embedded,
        cli.config.len()
    );

    let mut options = LayeredConfigOptions::new(&cwd);
    for path in &cli.config {
        options = options.with_runtime_path(path);
    }
    let layered =
        CounselConfig::load_layered_with_options(options).context("failed to load config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());

    let system = start_system(layered.config, &cli).await?;
    let outcome = run_command(&system, cli.command).await;
    system.shutdown().await;
    outcome
}

/// Start a system over either the spawned service or an embedded one.
async fn start_system(config: CounselConfig, cli: &Cli) -> anyhow::Result<CounselSystem> {
    let coordinator = if cli.embedded {
        let transport = embedded_transport(&config);
        StartupCoordinator::new(config).with_transport(transport)
    } else {
        StartupCoordinator::new(config).with_service_args(service_args(cli))
    };
    coordinator.start().await.context("failed to start counsel")
}

/// Build the model service in-process and return its channel.
fn embedded_transport(config: &CounselConfig) -> Arc<dyn ServiceTransport> {
    info!("running the model service inside this process");
    let probe: Arc<dyn DeviceProbe> = Arc::new(SystemProbe::new());
    let loader = Arc::new(DeterministicLoader::default());
    let registry = Arc::new(ModelRegistry::new(config, loader, Arc::clone(&probe)));
    let host = Arc::new(ServiceHost::new(Arc::new(config.clone()), registry, probe));
    Arc::new(InProcessTransport::new(host))
}

/// Flags forwarded to the spawned service so it resolves the same config.
fn service_args(cli: &Cli) -> Vec<String> {
    let mut args = Vec::new();
    for path in &cli.config {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    args
}

async fn run_command(system: &CounselSystem, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ask {
            question,
            style,
            max_chunks,
            min_relevance,
            no_sources,
            json,
        } => {
            let mut request = ConsultationRequest::new(question);
            request.max_chunks = max_chunks;
            request.min_relevance = min_relevance;
            request.include_sources = !no_sources;
            if let Some(style) = style.as_deref() {
                request.response_style = Some(parse_style(style)?);
            }
            let response = system.consult(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::Status { json } => {
            let status = system.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }
    Ok(())
}

fn parse_style(style: &str) -> anyhow::Result<ResponseStyle> {
    match style.to_lowercase().as_str() {
        "concise" => Ok(ResponseStyle::Concise),
        "detailed" => Ok(ResponseStyle::Detailed),
        "technical" => Ok(ResponseStyle::Technical),
        other => bail!("unknown style: {other} (expected concise, detailed or technical)"),
    }
}

fn print_response(response: &ConsultationResponse) {
    println!("{}", response.answer);
    println!();
    println!(
        "confidence {:.2} | model {} | chunks {}/{} | {:.2}s{}",
        response.confidence,
        response.model_used,
        response.chunks_used,
        response.chunks_analyzed,
        response.processing_time,
        if response.degraded { " | degraded" } else { "" }
    );
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for (position, source) in response.sources.iter().enumerate() {
            println!(
                "  [{}] {} (relevance {:.2})",
                position + 1,
                source.document_id,
                source.relevance_score
            );
        }
    }
}

fn print_status(status: &SystemStatus) {
    println!("ready: {}", status.ready);
    for process in &status.processes {
        println!(
            "  {}: {} (failures={}, restarts={}, rss={} MB, loaded=[{}])",
            process.name,
            process.status.as_str(),
            process.consecutive_failures,
            process.restarts_in_window,
            process.memory.rss_mb,
            process.loaded_models.join(", ")
        );
    }
}
