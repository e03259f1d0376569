//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::adapters::mpd::{MpdClient, Timeouts, DEFAULT_PORT as MPD_DEFAULT_PORT};

const APP_DIR_NAME: &str = "mpd-bridge";
const ENV_PREFIX: &str = "MPD_BRIDGE";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mpd: MpdConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpdConfig {
    #[serde(default = "default_mpd_host")]
    pub host: String,
    #[serde(default = "default_mpd_port")]
    pub port: u16,
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_mpd_host() -> String {
    "localhost".to_string()
}

fn default_mpd_port() -> u16 {
    MPD_DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: default_mpd_host(),
            port: default_mpd_port(),
            password: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl MpdConfig {
    pub fn client(&self) -> MpdClient {
        MpdClient::new(&self.host, self.port)
            .with_password(self.password.clone())
            .with_timeouts(Timeouts {
                connect: Duration::from_millis(self.connect_timeout_ms),
                response: Duration::from_millis(self.response_timeout_ms),
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Deadline for API requests; the live feed is exempt
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// CORS origins allowed to call the API with credentials
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_allowed_origins() -> Vec<String> {
    [
        "http://localhost",
        "http://localhost:3000",
        "http://127.0.0.1",
        "http://127.0.0.1:3000",
        "http://10.0.0.2",
        "http://10.0.0.2:3000",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MPD_BRIDGE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from(".")
}

/// Split the `MPD_HOST` convention `password@host` into its parts.
pub fn split_mpd_host(value: &str) -> (Option<String>, String) {
    match value.rsplit_once('@') {
        Some((password, host)) if !password.is_empty() => {
            (Some(password.to_string()), host.to_string())
        }
        Some((_, host)) => (None, host.to_string()),
        None => (None, value.to_string()),
    }
}

fn env_port(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse::<u16>().ok())
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // config.toml / config.json / ... if present
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // MPD_BRIDGE_PORT, MPD_BRIDGE_MPD__HOST, MPD_BRIDGE_HTTP__ALLOWED_ORIGINS=a,b ...
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("http.allowed_origins")
                .try_parsing(true),
        );

    // Port precedence: MPD_BRIDGE_PORT > PORT > config > default
    if let Some(port) = env_port("MPD_BRIDGE_PORT") {
        builder = builder.set_override("port", port as i64)?;
    } else if let Some(port) = env_port("PORT") {
        builder = builder.set_override("port", port as i64)?;
    }

    // Conventional MPD client variables, unless the prefixed ones are set
    if std::env::var("MPD_BRIDGE_MPD__HOST").is_err() {
        if let Ok(value) = std::env::var("MPD_HOST") {
            let (password, host) = split_mpd_host(&value);
            builder = builder.set_override("mpd.host", host)?;
            if let Some(password) = password {
                builder = builder.set_override("mpd.password", password)?;
            }
        }
    }
    if std::env::var("MPD_BRIDGE_MPD__PORT").is_err() {
        if let Some(port) = env_port("MPD_PORT") {
            builder = builder.set_override("mpd.port", port as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
