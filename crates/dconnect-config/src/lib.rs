//! Shared configuration for the dconnect CLI and other embedders.
//!
//! TOML profiles (one per Device Connect Manager), `DCONNECT__` environment
//! overrides, and translation to `dconnect_core::ClientConfig`. Core never
//! reads these types; it receives a pre-built `ClientConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dconnect_core::{ClientConfig, HmacKey, HostConfig, ScopeSet, TlsVerification};

/// Prefix for environment overrides, e.g. `DCONNECT__DEFAULTS__TIMEOUT=10`.
pub const ENV_PREFIX: &str = "DCONNECT__";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named manager profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Sent as `applicationName` when requesting tokens.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    #[serde(default = "default_origin")]
    pub origin: String,

    /// REST timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Handshake ack timeout in seconds. Unset waits indefinitely.
    #[serde(default)]
    pub handshake_timeout: Option<u64>,

    /// Reconnect monitor period in milliseconds; 0 disables it.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    #[serde(default = "default_max_reauthorizations")]
    pub max_reauthorizations: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            application_name: default_application_name(),
            origin: default_origin(),
            timeout: default_timeout(),
            handshake_timeout: None,
            monitor_interval_ms: default_monitor_interval_ms(),
            max_reauthorizations: default_max_reauthorizations(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_application_name() -> String {
    "dconnect".into()
}
fn default_origin() -> String {
    "http://localhost".into()
}
fn default_timeout() -> u64 {
    60
}
fn default_monitor_interval_ms() -> u64 {
    1000
}
fn default_max_reauthorizations() -> u32 {
    1
}

/// One Device Connect Manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Host name or address, without scheme.
    pub host: String,

    /// Defaults to 4035.
    pub port: Option<u16>,

    #[serde(default)]
    pub ssl: bool,

    /// Scopes to request. Empty means the standard profile list.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Override `defaults.origin`.
    pub origin: Option<String>,

    /// `X-GotAPI-Origin` for hybrid apps.
    pub extended_origin: Option<String>,

    /// Hex anti-spoofing key (plaintext; prefer `hmac_key_env`).
    pub hmac_key: Option<String>,

    /// Environment variable holding the hex anti-spoofing key.
    pub hmac_key_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Accept self-signed certificates.
    pub insecure: Option<bool>,

    /// Override `defaults.timeout`.
    pub timeout: Option<u64>,
}

impl Profile {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            ssl: false,
            scopes: Vec::new(),
            origin: None,
            extended_origin: None,
            hmac_key: None,
            hmac_key_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
        }
    }

    pub fn host_config(&self) -> HostConfig {
        let host = HostConfig::new(self.host.clone()).with_ssl(self.ssl);
        match self.port {
            Some(port) => host.with_port(port),
            None => host,
        }
    }

    pub fn scope_set(&self) -> ScopeSet {
        if self.scopes.is_empty() {
            ScopeSet::default_profiles()
        } else {
            self.scopes.iter().map(String::as_str).collect()
        }
    }
}

impl Config {
    /// `requested`, else `default_profile`, else `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.profile_names().join(", "),
            })
    }

    /// Sorted profile names.
    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "deviceconnect", "dconnect")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("dconnect");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the CLI keeps persisted sessions (access tokens).
pub fn sessions_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("sessions.json"),
        |dirs| dirs.data_dir().join("sessions.json"),
    )
}

// ── Loading / saving ────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `DCONNECT__` env vars.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment(path).extract()?)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to ClientConfig ─────────────────────────────────────

/// Resolve the anti-spoofing key: `hmac_key_env` first, then plaintext.
pub fn resolve_hmac_key(profile: &Profile) -> Result<Option<HmacKey>, ConfigError> {
    let from_env = profile
        .hmac_key_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok());

    let Some(hex_key) = from_env.or_else(|| profile.hmac_key.clone()) else {
        return Ok(None);
    };

    HmacKey::from_hex(hex_key.trim())
        .map(Some)
        .map_err(|e| ConfigError::Validation {
            field: "hmac_key".into(),
            reason: e.to_string(),
        })
}

/// Build a `ClientConfig` from global defaults and an optional profile.
pub fn client_config(defaults: &Defaults, profile: Option<&Profile>) -> Result<ClientConfig, ConfigError> {
    if defaults.application_name.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "application_name".into(),
            reason: "must not be empty".into(),
        });
    }

    let mut config = ClientConfig {
        application_name: defaults.application_name.clone(),
        origin: defaults.origin.clone(),
        timeout: Duration::from_secs(defaults.timeout),
        handshake_timeout: defaults.handshake_timeout.map(Duration::from_secs),
        monitor_interval: (defaults.monitor_interval_ms > 0)
            .then(|| Duration::from_millis(defaults.monitor_interval_ms)),
        max_reauthorizations: defaults.max_reauthorizations,
        ..ClientConfig::default()
    };

    let Some(profile) = profile else {
        return Ok(config);
    };

    if let Some(port) = profile.port {
        config.default_port = port;
    }
    config.default_ssl = profile.ssl;
    if let Some(ref origin) = profile.origin {
        config.origin.clone_from(origin);
    }
    config.extended_origin.clone_from(&profile.extended_origin);
    if let Some(secs) = profile.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    config.tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };
    config.hmac_key = resolve_hmac_key(profile)?;

    Ok(config)
}
