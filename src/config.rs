use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::dispatch::Backend;
use crate::normalize::NormalizeOptions;
use crate::scheduler;

const DEFAULT_CONFIG_PATH: &str = "/config/seriesdash.yaml";

/// Top-level configuration for the seriesdash service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub timeouts: RequestTimeouts,
    #[serde(default)]
    pub normalize: NormalizeOptions,
    #[serde(default)]
    pub default_session: Option<DefaultSession>,
}

/// HTTP listener configuration (bind address).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:8282".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

/// Base URLs of the forwarding proxy, one per backend.
///
/// The proxy injects backend credentials, so these must never carry any.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub prometheus_url: Option<String>,
    #[serde(default)]
    pub clickhouse_url: Option<String>,
}

/// Per-backend request timeouts (with friendly duration parsing).
#[derive(Debug, Clone, Deserialize)]
pub struct RequestTimeouts {
    #[serde(
        default = "RequestTimeouts::default_label_vector",
        with = "humantime_serde"
    )]
    pub label_vector: Duration,
    #[serde(default = "RequestTimeouts::default_tabular", with = "humantime_serde")]
    pub tabular: Duration,
}

impl RequestTimeouts {
    const fn default_label_vector() -> Duration {
        Duration::from_secs(30)
    }

    const fn default_tabular() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            label_vector: Self::default_label_vector(),
            tabular: Self::default_tabular(),
        }
    }
}

/// Session created at startup, like opening the page with its defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSession {
    #[serde(default = "DefaultSession::default_backend")]
    pub backend: Backend,
    #[serde(default = "DefaultSession::default_query")]
    pub query: String,
    #[serde(default = "DefaultSession::default_range")]
    pub range: String,
    #[serde(default)]
    pub step_seconds: Option<u64>,
    #[serde(default)]
    pub refresh_seconds: f64,
}

impl DefaultSession {
    const fn default_backend() -> Backend {
        Backend::Prometheus
    }

    fn default_query() -> String {
        "up".to_string()
    }

    fn default_range() -> String {
        "1h".to_string()
    }
}

/// Load configuration from YAML disk file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("SERIESDASH_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Parse a YAML document into a config (no env overrides).
pub fn parse_config(raw: &str) -> Result<AppConfig> {
    let config: AppConfig = serde_yaml::from_str(raw).context("failed to parse YAML config")?;
    validate(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(url) = env::var("SERIESDASH_PROMETHEUS_URL") {
        if !url.trim().is_empty() {
            config.backends.prometheus_url = Some(url);
        }
    }

    if let Ok(url) = env::var("SERIESDASH_CLICKHOUSE_URL") {
        if !url.trim().is_empty() {
            config.backends.clickhouse_url = Some(url);
        }
    }

    if let Ok(bind) = env::var("SERIESDASH_BIND") {
        if !bind.trim().is_empty() {
            config.http.bind = bind;
        }
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    for (name, url) in [
        ("prometheus_url", &config.backends.prometheus_url),
        ("clickhouse_url", &config.backends.clickhouse_url),
    ] {
        if let Some(url) = url {
            ensure_no_credentials(name, url)?;
        }
    }

    if let Some(session) = &config.default_session {
        if let Err(reason) = scheduler::check_interval(session.refresh_seconds) {
            bail!("default_session.refresh_seconds: {reason}");
        }
    }

    Ok(())
}

fn ensure_no_credentials(name: &str, url: &str) -> Result<()> {
    let authority = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();

    if authority.contains('@') {
        bail!(
            "Remove credentials from backends.{name}; the forwarding proxy injects backend authentication."
        );
    }
    Ok(())
}
