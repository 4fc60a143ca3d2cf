// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet Configuration
//!
//! Single configuration object threaded through orchestrator construction.
//! Loaded from YAML with discovery, then patched by environment overrides.
//!
//! ```yaml
//! remote:
//!   credentials:
//!     username: labadmin
//!     password: secret
//!   max_concurrent_sessions: 3
//! send:
//!   destination_template: /mnt/lab/{address}/Users/Public/Desktop
//! collect:
//!   source_template: /mnt/lab/{address}/Users/Public/Documents/Homework
//!   destination: ./collected
//!   pattern: "*.docx"
//!   recurse: true
//! network:
//!   default_gateway: 192.168.1.1
//!   interface_pattern: 192.168.1.*
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Configuration model, discovery and validation

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::domain::remote::{Credentials, SessionTimeouts};
use crate::domain::target::TargetIdentity;

pub const CONFIG_PATH_ENV: &str = "LABFLEET_CONFIG_PATH";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown placeholder '{{{placeholder}}}' in template '{template}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("invalid include pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub fleet: FleetSettings,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default = "default_remote_port")]
    pub port: u16,

    #[serde(default)]
    pub timeouts: SessionTimeouts,

    /// Sessions open at once across the whole fleet. Also caps idle sessions
    /// kept per target.
    #[serde(default = "default_max_sessions")]
    pub max_concurrent_sessions: usize,

    #[serde(default)]
    pub launcher: LauncherConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            port: default_remote_port(),
            timeouts: SessionTimeouts::default(),
            max_concurrent_sessions: default_max_sessions(),
            launcher: LauncherConfig::default(),
        }
    }
}

/// Local program that carries scripts to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_launcher_program")]
    pub program: String,

    /// Arguments; `{address}` and `{name}` are substituted per target.
    #[serde(default = "default_launcher_args")]
    pub args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: default_launcher_program(),
            args: default_launcher_args(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendConfig {
    #[serde(default = "default_send_destination")]
    pub destination_template: String,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            destination_template: default_send_destination(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(default = "default_collect_source")]
    pub source_template: String,

    /// Local root; each target gets a `<name>` subdirectory.
    #[serde(default = "default_collect_destination")]
    pub destination: PathBuf,

    #[serde(default = "default_collect_pattern")]
    pub pattern: String,

    #[serde(default)]
    pub recurse: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            source_template: default_collect_source(),
            destination: default_collect_destination(),
            pattern: default_collect_pattern(),
            recurse: false,
        }
    }
}

impl CollectConfig {
    pub fn compiled_pattern(&self) -> Result<glob::Pattern, ConfigError> {
        glob::Pattern::new(&self.pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: self.pattern.clone(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub default_gateway: String,

    /// `-Like` pattern selecting the lab-facing interface address.
    #[serde(default)]
    pub interface_pattern: String,

    #[serde(default = "default_remote_port")]
    pub probe_port: u16,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_wake_broadcast")]
    pub wake_broadcast: SocketAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_gateway: String::new(),
            interface_pattern: String::new(),
            probe_port: default_remote_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            wake_broadcast: default_wake_broadcast(),
        }
    }
}

impl NetworkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSettings {
    #[serde(default = "default_fleet_file")]
    pub fleet_file: PathBuf,

    #[serde(default = "default_mac_cache_dir")]
    pub mac_cache_dir: PathBuf,

    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            fleet_file: default_fleet_file(),
            mac_cache_dir: default_mac_cache_dir(),
            scripts_dir: default_scripts_dir(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl FleetSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_remote_port() -> u16 {
    5985
}

fn default_max_sessions() -> usize {
    3
}

fn default_launcher_program() -> String {
    "pwsh".to_string()
}

fn default_launcher_args() -> Vec<String> {
    vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-Command".to_string(),
        "-".to_string(),
    ]
}

fn default_send_destination() -> String {
    "/mnt/lab/{address}/Users/Public/Desktop".to_string()
}

fn default_collect_source() -> String {
    "/mnt/lab/{address}/Users/Public/Documents".to_string()
}

fn default_collect_destination() -> PathBuf {
    PathBuf::from("./collected")
}

fn default_collect_pattern() -> String {
    "*".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    100
}

fn default_wake_broadcast() -> SocketAddr {
    SocketAddr::from(([255, 255, 255, 255], 7))
}

fn default_fleet_file() -> PathBuf {
    PathBuf::from("fleet.yaml")
}

fn default_mac_cache_dir() -> PathBuf {
    PathBuf::from("macs")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn placeholder_regex() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Za-z_]+)\}").ok())
        .as_ref()
}

/// Substitutes `{address}` and `{name}` in a path template.
pub fn render_template(template: &str, target: &TargetIdentity) -> Result<String, ConfigError> {
    check_template(template)?;
    Ok(template
        .replace("{address}", &target.address.to_string())
        .replace("{name}", &target.name))
}

fn check_template(template: &str) -> Result<(), ConfigError> {
    let Some(placeholders) = placeholder_regex() else {
        return Ok(());
    };
    for captures in placeholders.captures_iter(template) {
        let placeholder = &captures[1];
        if placeholder != "address" && placeholder != "name" {
            return Err(ConfigError::UnknownPlaceholder {
                template: template.to_string(),
                placeholder: placeholder.to_string(),
            });
        }
    }
    Ok(())
}

impl FleetConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. LABFLEET_CONFIG_PATH environment variable
    /// 2. ./labfleet-config.yaml (working directory)
    /// 3. ~/.labfleet/config.yaml (user home)
    /// 4. /etc/labfleet/config.yaml (system, Unix) or C:\ProgramData\Labfleet\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./labfleet-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".labfleet").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/labfleet/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Labfleet\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Overrides credentials, the session limit and the gateway from
    /// `LABFLEET_*` variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(username) = env_override("LABFLEET_USERNAME", false) {
            self.remote.credentials.username = username;
        }
        if let Some(password) = env_override("LABFLEET_PASSWORD", true) {
            self.remote.credentials.password = password;
        }
        if let Some(raw) = env_override("LABFLEET_MAX_SESSIONS", false) {
            match raw.parse::<usize>() {
                Ok(max) => self.remote.max_concurrent_sessions = max,
                Err(_) => tracing::warn!(value = %raw, "LABFLEET_MAX_SESSIONS is not a number; ignored"),
            }
        }
        if let Some(gateway) = env_override("LABFLEET_DEFAULT_GATEWAY", false) {
            self.network.default_gateway = gateway;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote.max_concurrent_sessions == 0 {
            anyhow::bail!("remote.max_concurrent_sessions must be at least 1");
        }

        if self.remote.port == 0 {
            anyhow::bail!("remote.port cannot be 0");
        }

        if self.remote.launcher.program.trim().is_empty() {
            anyhow::bail!("remote.launcher.program cannot be empty");
        }

        if self.transfer.chunk_size == 0 {
            anyhow::bail!("transfer.chunk_size must be at least 1");
        }

        check_template(&self.send.destination_template)?;
        check_template(&self.collect.source_template)?;
        for arg in &self.remote.launcher.args {
            check_template(arg)?;
        }

        self.collect.compiled_pattern()?;

        Ok(())
    }
}

fn env_override(name: &str, secret: bool) -> Option<String> {
    let value = std::env::var(name).ok()?;
    if secret {
        tracing::info!(variable = name, "Environment override");
    } else {
        tracing::info!(variable = name, %value, "Environment override");
    }
    Some(value)
}
