//! Configuration for cofferd

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Settlement gateway (payment node) client
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Identity directory client
    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (development and tests)
    #[default]
    Memory,

    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Reconciliation cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Frequent pass over recently issued invoices
    #[serde(default = "default_invoice_poll_interval")]
    pub invoice_poll_interval_secs: u64,

    /// Infrequent full sweep plus balance audit
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_max_concurrent_workspaces")]
    pub max_concurrent_workspaces: usize,

    #[serde(default = "default_recent_window")]
    pub recent_invoice_window_secs: u64,

    /// Disable to run the API without background loops
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            invoice_poll_interval_secs: default_invoice_poll_interval(),
            sweep_interval_secs: default_sweep_interval(),
            max_concurrent_workspaces: default_max_concurrent_workspaces(),
            recent_invoice_window_secs: default_recent_window(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Unset means no payment node: nothing ever settles.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_gateway_timeout")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_gateway_timeout(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Unset means an empty in-process directory.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_directory_timeout")]
    pub timeout_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_directory_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_invoice_poll_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    30 * 60
}

fn default_max_concurrent_workspaces() -> usize {
    8
}

fn default_recent_window() -> u64 {
    24 * 60 * 60
}

fn default_gateway_timeout() -> u64 {
    5_000
}

fn default_directory_timeout() -> u64 {
    3_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Layer defaults, an optional file and `COFFER_*` environment variables
    /// (`COFFER_SCHEDULER__SWEEP_INTERVAL_SECS=600`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COFFER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
