//! Layered configuration loader with constraints.
//!
//! Discovers configuration layers (system/user/project/etc), validates
//! schema, merges them with optional constraints, and produces a final
//! `CounselConfig`.

mod layer_io;
mod merge;
mod schema;


use crate::{ConfigError, CounselConfig};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "counsel.json5";
/// Default config directory under user or repo roots.
const DEFAULT_CONFIG_DIR: &str = ".counsel";
/// Marker files/dirs that identify a project root.
const DEFAULT_PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

#[cfg(unix)]
/// Default system config path on Unix.
const SYSTEM_CONFIG_PATH: &str = "/etc/counsel/counsel.json5";
#[cfg(unix)]
/// Default requirements path on Unix.
const SYSTEM_REQUIREMENTS_PATH: &str = "/etc/counsel/requirements.json5";
#[cfg(windows)]
/// Default system config path on Windows.
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\counsel\\counsel.json5";
#[cfg(windows)]
/// Default requirements path on Windows.
const SYSTEM_REQUIREMENTS_PATH: &str = "C:\\ProgramData\\counsel\\requirements.json5";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: CounselConfig,
    /// Metadata for each layer considered during load.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// Immutable requirements constraints.
    Requirements,
    /// System-wide configuration.
    System,
    /// User-specific configuration.
    User,
    /// Project root configuration.
    Project,
    /// Current working directory configuration.
    Cwd,
    /// Repo-local configuration under the config directory.
    Repo,
    /// Runtime overrides (highest precedence).
    Runtime,
}

/// Metadata about a config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer origin (system, user, runtime, etc).
    pub source: ConfigLayerSource,
    /// Location on disk if present.
    pub path: Option<PathBuf>,
}

/// Schema validation mode for layered configs.
#[derive(Debug, Clone, Copy)]
enum SchemaMode {
    /// Partial validation for non-final layers.
    Partial,
    /// Full validation for the effective config.
    Full,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to resolve relative paths and local layers.
    pub cwd: PathBuf,
    /// Optional system config path (defaults to `/etc/counsel/counsel.json5`
    /// on Unix).
    pub system_config_path: Option<PathBuf>,
    /// Optional user config path (defaults to `~/.counsel/counsel.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Optional requirements/constraints path for locked settings.
    pub requirements_path: Option<PathBuf>,
    /// Runtime override config paths applied last.
    pub runtime_paths: Vec<PathBuf>,
    /// Marker files/dirs used to detect the project root.
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        let cwd = cwd.as_ref().to_path_buf();
        Self {
            cwd,
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            requirements_path: layer_io::default_requirements_path(),
            runtime_paths: Vec::new(),
            project_root_markers: DEFAULT_PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl CounselConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        let value: Value = json5::from_str(&contents)?;
        config_from_value(value, "config")
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        info!(
            "loading layered config with defaults (cwd={})",
            cwd.as_ref().display()
        );
        let options = LayeredConfigOptions::new(cwd);
        Self::load_layered_with_options(options)
    }

    /// Load a layered config stack using explicit layer locations and
    /// overrides.
    ///
    /// Layer precedence (low -> high): requirements (constraints), system,
    /// user, project, cwd, repo, runtime overrides.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = layer_io::normalize_path(&options.cwd)?;
        debug!("normalized cwd for config load: {}", cwd.display());
        let mut layers = Vec::new();
        let mut merge_layers = Vec::new();
        let mut seen_paths = HashSet::new();

        let requirements = layer_io::load_optional_layer(
            ConfigLayerSource::Requirements,
            options.requirements_path.as_deref(),
        )?;
        let requirements_value = requirements.as_ref().map(|layer| layer.value.clone());
        if let Some(layer) = requirements {
            debug!("loaded requirements layer");
            layers.push(layer.meta);
        }

        for (source, path) in [
            (
                ConfigLayerSource::System,
                options.system_config_path.as_deref(),
            ),
            (ConfigLayerSource::User, options.user_config_path.as_deref()),
        ] {
            if let Some(layer) = layer_io::load_optional_layer(source, path)? {
                debug!("loaded {:?} layer", source);
                layers.push(layer.meta.clone());
                merge_layers.push(layer);
            }
        }

        let project_root = layer_io::find_project_root(&cwd, &options.project_root_markers);
        if let Some(project_root) = project_root.as_ref() {
            debug!("resolved project root: {}", project_root.display());
        } else {
            debug!("project root not found; skipping project/repo layers");
        }

        let mut local_candidates = Vec::new();
        if let Some(project_root) = project_root.as_ref() {
            local_candidates.push((
                ConfigLayerSource::Project,
                project_root.join(DEFAULT_CONFIG_FILE),
            ));
        }
        local_candidates.push((ConfigLayerSource::Cwd, cwd.join(DEFAULT_CONFIG_FILE)));
        if let Some(project_root) = project_root.as_ref() {
            local_candidates.push((
                ConfigLayerSource::Repo,
                project_root.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE),
            ));
        }

        for (source, path) in local_candidates {
            if !path.exists() {
                debug!(
                    "skipping missing layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if !seen_paths.insert(layer_io::unique_path(&path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            let loaded = layer_io::load_required_layer(source, &path)?;
            debug!("loaded layer (source={:?}, path={})", source, path.display());
            layers.push(loaded.meta.clone());
            merge_layers.push(loaded);
        }

        for runtime_path in &options.runtime_paths {
            let loaded = layer_io::load_required_layer(ConfigLayerSource::Runtime, runtime_path)?;
            debug!("loaded runtime layer (path={})", runtime_path.display());
            layers.push(loaded.meta.clone());
            merge_layers.push(loaded);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        if let Some(requirements_value) = &requirements_value {
            merge::merge_layer(&mut merged, requirements_value, None);
        }
        for layer in merge_layers {
            merge::merge_layer(&mut merged, &layer.value, requirements_value.as_ref());
        }

        let config = config_from_value(merged, "effective")?;
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.analysis.relevance_threshold) {
            return Err(ConfigError::Invalid(format!(
                "analysis.relevance_threshold must be within [0.0, 1.0], got {}",
                self.analysis.relevance_threshold
            )));
        }
        if self.retrieval.max_chunks == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.max_chunks must be at least 1".to_string(),
            ));
        }
        if self.service.embed_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "service.embed_parallelism must be at least 1".to_string(),
            ));
        }
        if self.models.gpu.full_offload_mb < self.models.gpu.partial_offload_mb {
            return Err(ConfigError::Invalid(
                "models.gpu.full_offload_mb must not be below partial_offload_mb".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for descriptor in &self.models.catalog {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate model name in catalog: {}",
                    descriptor.name
                )));
            }
        }

        if !self.models.catalog.is_empty() {
            for (role, name) in [
                ("embedding", &self.models.embedding),
                ("generation", &self.models.generation),
            ] {
                if !seen.contains(name.as_str()) {
                    warn!(
                        "config names a missing {} model (name={}); startup validation will fail",
                        role, name
                    );
                    return Err(ConfigError::Invalid(format!(
                        "models.{role} references unknown catalog entry: {name}"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<CounselConfig, ConfigError> {
    schema::validate_layer_schema(&value, SchemaMode::Full, label)?;
    let config: CounselConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
