//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/mird/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/mird/` (~/.config/mird/)
//! - Data: `$XDG_DATA_HOME/mird/` (~/.local/share/mird/)
//! - State/Logs: `$XDG_STATE_HOME/mird/` (~/.local/state/mird/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `collector.notification_email`.
pub const NOTIFICATION_EMAIL_ENV: &str = "MIRD_NOTIFICATION_EMAIL";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Collector endpoint (server side)
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Analytics client (sender side)
    #[serde(default)]
    pub client: ClientConfig,

    /// EU redirect
    #[serde(default)]
    pub geo: GeoConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector endpoint configuration
///
/// These values live only on the server and are never shipped to clients.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Socket address the HTTP server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Route the tracking endpoint is mounted on
    #[serde(default = "default_path")]
    pub path: String,

    /// Main JSON-lines file receiving every event
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// Plain-text error log
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,

    /// Size in bytes above which the main file is rotated
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Origins that receive CORS headers (exact match)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Whether `X-Analytics-Token` is checked
    #[serde(default = "default_true")]
    pub require_token: bool,

    /// Shared secret expected in `X-Analytics-Token`
    #[serde(default = "default_token")]
    pub security_token: String,

    /// Directory holding one JSON-lines file per active session
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,

    /// Recipient of session summaries; `MIRD_NOTIFICATION_EMAIL` takes precedence
    pub notification_email: Option<String>,

    /// sendmail-compatible binary used to deliver summaries
    #[serde(default = "default_sendmail_path")]
    pub sendmail_path: PathBuf,

    /// Host name in the summary sender address; the request `Host` header
    /// is used when unset
    pub server_name: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
            data_file: default_data_file(),
            error_log: default_error_log(),
            max_file_size: default_max_file_size(),
            allowed_origins: default_allowed_origins(),
            require_token: true,
            security_token: default_token(),
            session_dir: default_session_dir(),
            notification_email: None,
            sendmail_path: default_sendmail_path(),
            server_name: None,
        }
    }
}

impl CollectorConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.require_token && self.security_token.is_empty() {
            return Err(Error::Config(
                "collector.security_token is required when require_token is set".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(Error::Config(
                "collector.max_file_size must be greater than zero".to_string(),
            ));
        }
        if !self.path.starts_with('/') {
            return Err(Error::Config(
                "collector.path must start with '/'".to_string(),
            ));
        }
        Ok(())
    }

    /// Notification address, with the environment overriding the file.
    pub fn notification_address(&self) -> Option<String> {
        std::env::var(NOTIFICATION_EMAIL_ENV)
            .ok()
            .or_else(|| self.notification_email.clone())
            .filter(|addr| !addr.trim().is_empty())
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_path() -> String {
    "/track".to_string()
}

fn default_data_file() -> PathBuf {
    Config::data_dir().join("analytics_data.json")
}

fn default_error_log() -> PathBuf {
    Config::state_dir().join("analytics_errors.log")
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://tglauner.com".to_string(),
        "https://www.tglauner.com".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_token() -> String {
    "mird_analytics_token_2025".to_string()
}

fn default_session_dir() -> PathBuf {
    Config::data_dir().join("sessions")
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

/// Analytics client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Full URL of the collector endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Token sent as `X-Analytics-Token`
    #[serde(default = "default_token")]
    pub token: String,

    /// Minutes of inactivity before the session rotates
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,

    /// Upper bound for the page-teardown send
    #[serde(default = "default_beacon_timeout")]
    pub beacon_timeout_secs: u64,

    /// Cap for each local buffer; oldest records are dropped first
    #[serde(default = "default_max_buffered")]
    pub max_buffered_records: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: default_token(),
            session_timeout_minutes: default_session_timeout(),
            timeout_secs: default_client_timeout(),
            beacon_timeout_secs: default_beacon_timeout(),
            max_buffered_records: default_max_buffered(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::Config("client.endpoint is required".to_string()));
        }
        if self.session_timeout_minutes == 0 {
            return Err(Error::Config(
                "client.session_timeout_minutes must be greater than zero".to_string(),
            ));
        }
        if self.max_buffered_records == 0 {
            return Err(Error::Config(
                "client.max_buffered_records must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Session inactivity window
    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.session_timeout_minutes))
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/track".to_string()
}

fn default_session_timeout() -> u32 {
    30
}

fn default_client_timeout() -> u64 {
    10
}

fn default_beacon_timeout() -> u64 {
    2
}

fn default_max_buffered() -> usize {
    500
}

/// EU redirect configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GeoConfig {
    /// IP-to-country endpoint returning `{"country_code": "DE", ...}`
    #[serde(default = "default_lookup_url")]
    pub lookup_url: String,

    /// Where non-EU visitors are sent
    #[serde(default = "default_direct_url")]
    pub direct_url: String,

    /// Where EU visitors (and failed lookups) are sent
    #[serde(default = "default_pre_checkout_url")]
    pub pre_checkout_url: String,

    /// Lookup timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            lookup_url: default_lookup_url(),
            direct_url: default_direct_url(),
            pre_checkout_url: default_pre_checkout_url(),
            timeout_secs: default_client_timeout(),
        }
    }
}

fn default_lookup_url() -> String {
    "https://ipapi.co/json/".to_string()
}

fn default_direct_url() -> String {
    "https://www.udemy.com/course/mastering-interest-rate-derivatives/?couponCode=IRDERIVS25_JAN_2026"
        .to_string()
}

fn default_pre_checkout_url() -> String {
    "pre-checkout.html".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write log lines to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.collector.validate()?;
        self.client.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/mird/config.toml` (~/.config/mird/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("mird").join("config.toml")
    }

    /// Returns the data directory path (event logs, client stores)
    ///
    /// `$XDG_DATA_HOME/mird/` (~/.local/share/mird/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("mird")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/mird/` (~/.local/state/mird/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("mird")
    }

    /// Returns the directory backing the client's key-value stores
    pub fn client_store_dir() -> PathBuf {
        Self::data_dir().join("client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collector.path, "/track");
        assert_eq!(config.collector.max_file_size, 10 * 1024 * 1024);
        assert!(config.collector.require_token);
        assert!(config.collector.server_name.is_none());
        assert_eq!(config.client.session_timeout_minutes, 30);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[collector]
bind = "0.0.0.0:9000"
data_file = "/srv/mird/analytics_data.json"
max_file_size = 2048
allowed_origins = ["https://example.com"]
require_token = false
server_name = "tglauner.com"

[client]
endpoint = "https://example.com/track"
session_timeout_minutes = 5

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.collector.bind, "0.0.0.0:9000");
        assert_eq!(
            config.collector.data_file,
            PathBuf::from("/srv/mird/analytics_data.json")
        );
        assert_eq!(config.collector.max_file_size, 2048);
        assert_eq!(config.collector.allowed_origins, vec!["https://example.com"]);
        assert!(!config.collector.require_token);
        assert_eq!(config.collector.server_name.as_deref(), Some("tglauner.com"));
        assert_eq!(config.client.session_timeout(), chrono::Duration::minutes(5));
        assert_eq!(config.logging.level, "debug");
        // untouched sections keep their defaults
        assert_eq!(config.geo.lookup_url, "https://ipapi.co/json/");
    }

    #[test]
    fn test_collector_config_validation() {
        let config = CollectorConfig {
            security_token: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            require_token: false,
            security_token: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = CollectorConfig {
            max_file_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            path: "track".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config_validation() {
        let config = ClientConfig {
            session_timeout_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            max_buffered_records: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\ntimeout_secs = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.client.timeout_secs, 3);

        std::fs::write(&path, "[client\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
