// config/mod.rs - YAML configuration loading and XDG-ish path resolution

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration, loaded from `<config_home>/todoat/config.yaml`.
///
/// Every key documented in the CLI reference has a `Default` so a freshly
/// installed binary runs with no config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_backend: String,
    pub sync: SyncConfig,
    pub trash: TrashConfig,
    pub backends: HashMap<String, BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_backend: "sqlite".to_string(),
            sync: SyncConfig::default(),
            trash: TrashConfig::default(),
            backends: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub local_backend: String,
    pub offline_mode: OfflineMode,
    pub connectivity_timeout_secs: u64,
    pub conflict_resolution: ConflictStrategy,
    pub auto_sync_after_operation: bool,
    pub background_pull_cooldown_secs: u64,
    pub missing_list_policy: MissingListPolicy,
    pub merge_fallback: MergeFallback,
    pub daemon: DaemonConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            local_backend: "sqlite".to_string(),
            offline_mode: OfflineMode::Auto,
            connectivity_timeout_secs: 5,
            conflict_resolution: ConflictStrategy::ServerWins,
            auto_sync_after_operation: false,
            background_pull_cooldown_secs: 30,
            missing_list_policy: MissingListPolicy::SkipWarn,
            merge_fallback: MergeFallback::ServerWins,
            daemon: DaemonConfig::default(),
        }
    }
}

impl SyncConfig {
    /// `background_pull_cooldown` has a documented floor of 5s regardless of config input.
    pub fn background_pull_cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.background_pull_cooldown_secs.max(5))
    }

    pub fn connectivity_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connectivity_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflineMode {
    Auto,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    ServerWins,
    LocalWins,
    Merge,
    KeepBoth,
}

impl std::str::FromStr for ConflictStrategy {
    type Err = crate::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "server_wins" => Ok(ConflictStrategy::ServerWins),
            "local_wins" => Ok(ConflictStrategy::LocalWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "keep_both" => Ok(ConflictStrategy::KeepBoth),
            other => Err(crate::Error::Validation(format!("invalid conflict strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingListPolicy {
    SkipWarn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFallback {
    ServerWins,
    LocalWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub enabled: bool,
    pub auto_start: bool,
    pub interval_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub backends: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_start: true,
            interval_secs: 300,
            idle_timeout_secs: None,
            backends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrashConfig {
    /// Auto-purge threshold in days; 0 disables purging.
    pub retention_days: u32,
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self { retention_days: 0 }
    }
}

/// Per-backend settings, e.g. `backends.nextcloud-personal.host`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: String,
    pub enabled: bool,
    pub host: Option<String>,
    pub username: Option<String>,
    pub path: Option<PathBuf>,
    pub allow_http: bool,
    pub insecure_skip_verify: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            enabled: true,
            host: None,
            username: None,
            path: None,
            allow_http: false,
            insecure_skip_verify: false,
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Load from the standard location, honoring `TODOAT_CONFIG` as an override.
    pub fn load_default() -> Result<Self> {
        let path = match std::env::var_os("TODOAT_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => Paths::new()?.config_file(),
        };
        Self::load(&path)
    }
}

/// XDG-ish path resolution, generalizing the app-data-dir lookup the desktop
/// shell used to get from Tauri's `AppHandle` into a standalone helper.
#[derive(Debug, Clone)]
pub struct Paths {
    config_home: PathBuf,
    data_home: PathBuf,
    state_home: PathBuf,
    runtime_home: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        let config_home = dirs::config_dir()
            .ok_or_else(|| crate::Error::Config("could not resolve config directory".into()))?;
        let data_home = dirs::data_dir()
            .ok_or_else(|| crate::Error::Config("could not resolve data directory".into()))?;
        let state_home = dirs::data_local_dir().unwrap_or_else(|| data_home.clone());
        let runtime_home = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_home.join("run"));
        Ok(Self {
            config_home,
            data_home,
            state_home,
            runtime_home,
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_home.join("todoat")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    pub fn views_dir(&self) -> PathBuf {
        self.config_dir().join("views")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_home.join("todoat")
    }

    pub fn local_store_file(&self) -> PathBuf {
        self.data_dir().join("tasks.db")
    }

    pub fn caches_dir(&self) -> PathBuf {
        self.data_dir().join("caches")
    }

    pub fn cache_file(&self, backend_id: &str) -> PathBuf {
        self.caches_dir().join(format!("{backend_id}.db"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_home.join("todoat")
    }

    pub fn daemon_store_file(&self) -> PathBuf {
        self.state_dir().join("todoat.db")
    }

    pub fn daemon_log_file(&self) -> PathBuf {
        self.state_dir().join("daemon.log")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_home.join("todoat")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.runtime_dir().join("daemon.pid")
    }

    pub fn socket_file(&self) -> PathBuf {
        self.runtime_dir().join("daemon.sock")
    }

    pub fn ensure_all(&self) -> Result<()> {
        for dir in [
            self.config_dir(),
            self.views_dir(),
            self.data_dir(),
            self.caches_dir(),
            self.state_dir(),
            self.runtime_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.connectivity_timeout_secs, 5);
        assert_eq!(config.sync.background_pull_cooldown_secs, 30);
        assert_eq!(config.sync.background_pull_cooldown().as_secs(), 30);
        assert_eq!(config.trash.retention_days, 0);
    }

    #[test]
    fn cooldown_floor_is_five_seconds() {
        let mut config = SyncConfig::default();
        config.background_pull_cooldown_secs = 1;
        assert_eq!(config.background_pull_cooldown().as_secs(), 5);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let config = Config::load(Path::new("/nonexistent/path/config.yaml")).unwrap();
        assert_eq!(config.default_backend, "sqlite");
    }

    #[test]
    fn parses_documented_yaml_shape() {
        let yaml = r#"
default_backend: nextcloud-personal
sync:
  enabled: true
  offline_mode: online
  conflict_resolution: keep_both
backends:
  nextcloud-personal:
    kind: caldav
    host: https://cloud.example.com
    username: alice
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_backend, "nextcloud-personal");
        assert!(config.sync.enabled);
        assert_eq!(config.sync.offline_mode, OfflineMode::Online);
        assert_eq!(config.sync.conflict_resolution, ConflictStrategy::KeepBoth);
        assert_eq!(
            config.backends["nextcloud-personal"].host.as_deref(),
            Some("https://cloud.example.com")
        );
    }
}
