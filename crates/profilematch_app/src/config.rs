//! Configuration file support for the profilematch CLI.
//!
//! Settings come from, lowest priority first:
//! - built-in defaults
//! - a RON file (`--config PATH`, or `./profilematch.ron` when present)
//! - CLI flags

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use profilematch_engine::{
    ApiSettings, CacheSettings, ChannelSettings, ReconnectPolicy, DEFAULT_NAMESPACE,
    DEFAULT_SERVER_URL,
};
use profilematch_logging::{pm_info, LogDestination, DEFAULT_LOG_FILE};

use crate::cli::Cli;

pub const DEFAULT_CONFIG_FILE: &str = "profilematch.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend base URL; REST and WebSocket endpoints are derived from it.
    pub server_url: String,
    pub request_timeout_secs: u64,
    pub cache: CacheConfig,
    pub reconnect: ReconnectConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub namespace: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of off, error, warn, info, debug, trace.
    pub level: String,
    pub file: PathBuf,
    /// Also log to the terminal.
    pub terminal: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_secs: 120,
            cache: CacheConfig::default(),
            reconnect: ReconnectConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".profilematch_cache"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl_secs: 5 * 60,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            cap_delay_ms: policy.cap_delay.as_millis() as u64,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: PathBuf::from(DEFAULT_LOG_FILE),
            terminal: false,
        }
    }
}

impl AppConfig {
    /// Load `explicit` (must exist), else `./profilematch.ron` if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = ron::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        pm_info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(server) = &cli.server {
            self.server_url = server.clone();
        }
        if let Some(dir) = &cli.cache_dir {
            self.cache.dir = dir.clone();
        }
        if cli.verbose {
            self.log.level = "debug".to_string();
        }
        self
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log.level.parse().unwrap_or(LevelFilter::Info)
    }

    pub fn log_destination(&self) -> LogDestination {
        if self.log.terminal {
            LogDestination::Both(self.log.file.clone())
        } else {
            LogDestination::File(self.log.file.clone())
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            cap_delay: Duration::from_millis(self.reconnect.cap_delay_ms),
        }
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            server_url: self.server_url.clone(),
            reconnect: self.reconnect_policy(),
            connect_timeout: Duration::from_secs(self.reconnect.connect_timeout_secs),
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            server_url: self.server_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ApiSettings::default()
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            namespace: self.cache.namespace.clone(),
            default_ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("profilematch.ron");
        fs::write(
            &path,
            r#"(
                server_url: "https://match.example.com",
                reconnect: (max_attempts: 3),
                cache: (ttl_secs: 60),
            )"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server_url, "https://match.example.com");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.cache.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.cache_settings().default_ttl, Duration::from_secs(60));
        assert_eq!(config.channel_settings().reconnect.max_attempts, 3);
    }

    #[test]
    fn explicit_config_must_exist_and_parse() {
        let temp = TempDir::new().unwrap();
        assert!(AppConfig::load(Some(&temp.path().join("nope.ron"))).is_err());

        let bad = temp.path().join("bad.ron");
        fs::write(&bad, "(server_url: 42)").unwrap();
        assert!(AppConfig::load(Some(&bad)).is_err());
    }

    #[test]
    fn cli_flags_win_over_file_values() {
        let cli = Cli::parse_from([
            "profilematch",
            "--server",
            "http://10.0.0.2:8000",
            "--cache-dir",
            "/tmp/pm",
            "--verbose",
            "health",
        ]);
        let config = AppConfig::default().with_overrides(&cli);
        assert_eq!(config.server_url, "http://10.0.0.2:8000");
        assert_eq!(config.cache.dir, PathBuf::from("/tmp/pm"));
        assert_eq!(config.log_level(), LevelFilter::Debug);
    }

    #[test]
    fn defaults_match_library_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(config.cache_settings(), CacheSettings::default());
        assert_eq!(config.log_level(), LevelFilter::Info);
        assert_eq!(
            config.log_destination(),
            LogDestination::File(PathBuf::from(DEFAULT_LOG_FILE))
        );
    }

    #[test]
    fn config_round_trips_through_ron() {
        let config = AppConfig::default();
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new()).unwrap();
        let parsed: AppConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
