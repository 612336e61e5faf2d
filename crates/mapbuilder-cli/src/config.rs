//! Parameter vault – reads/writes `~/.mapbuilder/config.toml`.
//!
//! Every field is optional in the file and falls back to the built-in
//! default.  Values are resolved in this order, later wins:
//!
//! 1. built-in defaults
//! 2. the TOML file (`~/.mapbuilder/config.toml`, or `--config <path>`)
//! 3. `MAPBUILDER_*` environment variables
//! 4. command-line flags (applied by `main`)

use std::fs;
use std::path::{Path, PathBuf};

use mapbuilder_runtime::PipelineConfig;
use mapbuilder_types::MapBuilderError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted clustering and linking parameters.
///
/// `depth` is signed so that a negative value in the file or environment
/// reaches validation and is reported instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_depth")]
    pub depth: i64,

    #[serde(default = "default_range")]
    pub range: f32,

    #[serde(default = "default_resolution")]
    pub resolution: f32,

    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,

    #[serde(default = "default_connectivity_threshold")]
    pub connectivity_threshold: f32,

    /// Hand the result to the console viewer after writing.
    #[serde(default = "default_view")]
    pub view: bool,
}

fn default_depth() -> i64 {
    2
}
fn default_range() -> f32 {
    1.0
}
fn default_resolution() -> f32 {
    0.025
}
fn default_distance_threshold() -> f32 {
    5.0
}
fn default_connectivity_threshold() -> f32 {
    0.01
}
fn default_view() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            range: default_range(),
            resolution: default_resolution(),
            distance_threshold: default_distance_threshold(),
            connectivity_threshold: default_connectivity_threshold(),
            view: default_view(),
        }
    }
}

impl Config {
    /// Convert to the pipeline's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MapBuilderError::Config`] for a negative depth.  Every
    /// other range check is left to [`PipelineConfig::validate`].
    pub fn to_pipeline_config(
        &self,
        output_path: Option<PathBuf>,
        show_quadtree: bool,
    ) -> Result<PipelineConfig, MapBuilderError> {
        let depth = usize::try_from(self.depth).map_err(|_| {
            MapBuilderError::config("depth", format!("must not be negative, got {}", self.depth))
        })?;
        Ok(PipelineConfig {
            depth,
            range: self.range,
            resolution: self.resolution,
            distance_threshold: self.distance_threshold,
            connectivity_threshold: self.connectivity_threshold,
            output_path,
            show_quadtree,
        })
    }
}

/// Return the path to `~/.mapbuilder/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mapbuilder").join("config.toml")
}

/// Resolve the effective configuration: file (if any) then environment.
///
/// With `explicit` set the file must exist; the default location is
/// optional.
pub fn resolve(explicit: Option<&Path>) -> Result<Config, MapBuilderError> {
    let mut cfg = match explicit {
        Some(path) => load_from(path)?.ok_or_else(|| {
            MapBuilderError::Io(format!("config file {} does not exist", path.display()))
        })?,
        None => load_from(&config_path())?.unwrap_or_default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, MapBuilderError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        MapBuilderError::Io(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| {
        MapBuilderError::Format(format!("failed to parse config at {}: {e}", path.display()))
    })?;
    Ok(Some(cfg))
}

/// Apply `MAPBUILDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MAPBUILDER_DEPTH` | `depth` |
/// | `MAPBUILDER_RANGE` | `range` |
/// | `MAPBUILDER_RESOLUTION` | `resolution` |
/// | `MAPBUILDER_DISTANCE_THRESHOLD` | `distance_threshold` |
/// | `MAPBUILDER_CONNECTIVITY_THRESHOLD` | `connectivity_threshold` |
///
/// Values that do not parse are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_number("MAPBUILDER_DEPTH") {
        cfg.depth = v;
    }
    if let Some(v) = env_number("MAPBUILDER_RANGE") {
        cfg.range = v;
    }
    if let Some(v) = env_number("MAPBUILDER_RESOLUTION") {
        cfg.resolution = v;
    }
    if let Some(v) = env_number("MAPBUILDER_DISTANCE_THRESHOLD") {
        cfg.distance_threshold = v;
    }
    if let Some(v) = env_number("MAPBUILDER_CONNECTIVITY_THRESHOLD") {
        cfg.connectivity_threshold = v;
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Save the config to disk, creating `~/.mapbuilder/` if necessary.
pub fn save(cfg: &Config) -> Result<(), MapBuilderError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), MapBuilderError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            MapBuilderError::Io(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| MapBuilderError::Format(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        MapBuilderError::Io(format!("failed to write config at {}: {e}", path.display()))
    })
}
