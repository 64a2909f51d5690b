//! Configuration for longbox.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LONGBOX_HOME, LONGBOX_DB)
//! 2. Config file (.longbox/config.yaml)
//! 3. Defaults (~/.longbox)
//!
//! Config file discovery:
//! - Searches current directory and parents for .longbox/config.yaml
//! - Paths in the config file are relative to the `.longbox/` directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::BatchSizes;
use crate::scanner::{default_ignore_patterns, DiscoverOptions};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: Option<ScanConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .longbox/)
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// Cover cache directory
    pub covers: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanConfig {
    pub queue_capacity: Option<usize>,
    pub history_size: Option<usize>,
    pub index_batch_size: Option<usize>,
    pub link_batch_size: Option<usize>,
    pub cover_batch_size: Option<usize>,
    pub pending_ttl_minutes: Option<i64>,
    pub include_hash: Option<bool>,
    pub ignore_patterns: Option<Vec<String>>,
}

/// Scan pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSettings {
    pub queue_capacity: usize,
    pub history_size: usize,
    pub index_batch_size: usize,
    pub link_batch_size: usize,
    pub cover_batch_size: usize,
    pub pending_ttl_minutes: i64,
    pub include_hash: bool,
    pub ignore_patterns: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            history_size: 100,
            index_batch_size: 50,
            link_batch_size: 100,
            cover_batch_size: 25,
            pending_ttl_minutes: 30,
            include_hash: true,
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl ScanSettings {
    fn from_file(config: Option<&ScanConfig>) -> Self {
        let defaults = Self::default();
        let Some(c) = config else {
            return defaults;
        };
        Self {
            // A zero-capacity queue would reject every scan
            queue_capacity: c.queue_capacity.unwrap_or(defaults.queue_capacity).max(1),
            history_size: c.history_size.unwrap_or(defaults.history_size),
            index_batch_size: c.index_batch_size.unwrap_or(defaults.index_batch_size),
            link_batch_size: c.link_batch_size.unwrap_or(defaults.link_batch_size),
            cover_batch_size: c.cover_batch_size.unwrap_or(defaults.cover_batch_size),
            pending_ttl_minutes: c.pending_ttl_minutes.unwrap_or(defaults.pending_ttl_minutes),
            include_hash: c.include_hash.unwrap_or(defaults.include_hash),
            ignore_patterns: c.ignore_patterns.clone().unwrap_or(defaults.ignore_patterns),
        }
    }

    pub fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            include_hash: self.include_hash,
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }

    pub fn batch_sizes(&self) -> BatchSizes {
        BatchSizes {
            index: self.index_batch_size,
            link: self.link_batch_size,
            covers: self.cover_batch_size,
        }
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_ttl_minutes)
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Cover cache directory
    pub cover_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub scan: ScanSettings,
}

impl ResolvedConfig {
    /// Everything under `home` with default settings
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            database: home.join("longbox.db"),
            cover_dir: home.join("covers"),
            home,
            config_file: None,
            scan: ScanSettings::default(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".longbox").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Overrides taken from the environment
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<PathBuf>,
    database: Option<PathBuf>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("LONGBOX_HOME").ok().map(PathBuf::from),
            database: std::env::var("LONGBOX_DB").ok().map(PathBuf::from),
        }
    }
}

fn resolve(
    default_home: PathBuf,
    config_file: Option<(PathBuf, ConfigFile)>,
    env: EnvOverrides,
) -> ResolvedConfig {
    let Some((config_path, file)) = config_file else {
        let mut config = ResolvedConfig::with_home(env.home.unwrap_or(default_home));
        if let Some(db) = env.database {
            config.database = db;
        }
        return config;
    };

    // Paths in the file are relative to .longbox/
    let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let home = env
        .home
        .or_else(|| file.paths.home.as_deref().map(|h| resolve_path(&base, h)))
        .unwrap_or(default_home);

    let database = env
        .database
        .or_else(|| file.paths.database.as_deref().map(|d| resolve_path(&base, d)))
        .unwrap_or_else(|| home.join("longbox.db"));

    let cover_dir = file
        .paths
        .covers
        .as_deref()
        .map(|c| resolve_path(&base, c))
        .unwrap_or_else(|| home.join("covers"));

    ResolvedConfig {
        home,
        database,
        cover_dir,
        config_file: Some(config_path),
        scan: ScanSettings::from_file(file.scan.as_ref()),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".longbox");

    let config_file = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    Ok(resolve(default_home, config_file, EnvOverrides::from_env()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
