//! Layered configuration for the resolution engine.
//!
//! Sources, later ones winning:
//! - Built-in defaults
//! - `.codesearch/settings.toml`, found by walking up from the current directory
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CS_` and use double underscores
//! to separate nested levels:
//! - `CS_GRAPH__MAX_CONCURRENCY=8` sets `graph.max_concurrency`
//! - `CS_CACHE__ENABLED=false` sets `cache.enabled`
//! - `CS_TRACE__SEMANTIC_BRIDGE_THRESHOLD=0.8` sets `trace.semantic_bridge_threshold`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::semantic::thresholds;

const CONFIG_DIR: &str = ".codesearch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "CS_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding `.codesearch`; relative paths resolve against it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub trace: TraceConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResolutionConfig {
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    /// Query the semantic tier on an exact miss
    #[serde(default = "default_true")]
    pub semantic_enabled: bool,

    /// Semantic neighbours requested per wanted result
    #[serde(default = "default_semantic_multiplier")]
    pub semantic_candidate_multiplier: usize,

    /// Allow `include_references` to run the reference-count pass
    #[serde(default = "default_true")]
    pub reference_enrichment: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GraphConfig {
    #[serde(default = "default_depth")]
    pub default_depth: u32,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Backend fetches allowed in flight during one traversal
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    /// Direct dependencies at or below this count are low coupling
    #[serde(default = "default_coupling_low")]
    pub coupling_low: usize,

    /// Direct dependencies above this count are high coupling
    #[serde(default = "default_coupling_high")]
    pub coupling_high: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TraceConfig {
    #[serde(default = "default_depth")]
    pub default_depth: u32,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Minimum similarity for a cross-language semantic edge
    #[serde(default = "default_bridge_threshold")]
    pub semantic_bridge_threshold: f32,

    /// Neighbours inspected per frontier symbol when bridging
    #[serde(default = "default_bridge_candidates")]
    pub semantic_bridge_candidates: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entries held in the in-memory level
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_true")]
    pub disk_enabled: bool,

    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,

    #[serde(default = "default_disk_capacity")]
    pub disk_capacity_bytes: u64,

    /// Wait before a `delayed` invalidation is applied
    #[serde(default = "default_delayed_ms")]
    pub delayed_invalidation_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `resolver = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_true() -> bool { true }
fn default_max_results() -> usize { 50 }
fn default_semantic_multiplier() -> usize { 2 }
fn default_depth() -> u32 { 3 }
fn default_max_depth() -> u32 { 10 }
fn default_concurrency() -> usize { num_cpus::get() }
fn default_coupling_low() -> usize { 5 }
fn default_coupling_high() -> usize { 15 }
fn default_bridge_threshold() -> f32 { thresholds::SIMILAR }
fn default_bridge_candidates() -> usize { 5 }
fn default_memory_capacity() -> usize { 1000 }
fn default_ttl_secs() -> u64 { 900 }
fn default_disk_path() -> PathBuf { PathBuf::from(".codesearch/cache") }
fn default_disk_capacity() -> u64 { 256 * 1024 * 1024 }
fn default_delayed_ms() -> u64 { 500 }
fn default_log_level() -> String { "warn".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            resolution: ResolutionConfig::default(),
            graph: GraphConfig::default(),
            trace: TraceConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            semantic_enabled: true,
            semantic_candidate_multiplier: default_semantic_multiplier(),
            reference_enrichment: true,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_depth: default_depth(),
            max_depth: default_max_depth(),
            max_concurrency: default_concurrency(),
            coupling_low: default_coupling_low(),
            coupling_high: default_coupling_high(),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            default_depth: default_depth(),
            max_depth: default_max_depth(),
            semantic_bridge_threshold: default_bridge_threshold(),
            semantic_bridge_candidates: default_bridge_candidates(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_capacity: default_memory_capacity(),
            default_ttl_secs: default_ttl_secs(),
            disk_enabled: true,
            disk_path: default_disk_path(),
            disk_capacity_bytes: default_disk_capacity(),
            delayed_invalidation_ms: default_delayed_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting; single underscores stay in field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file (env overrides still apply)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    /// Searches from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Directory containing `.codesearch`, if any
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Disk cache location, resolved against the workspace root when relative
    pub fn cache_dir(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.cache.disk_path.is_relative() => root.join(&self.cache.disk_path),
            _ => self.cache.disk_path.clone(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}
