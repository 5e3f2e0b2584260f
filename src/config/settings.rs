//! Hub configuration settings

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::{parse_services, HubResult, ServiceType};

/// Main hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeSettings,
    pub server: ServerSettings,
    #[serde(default)]
    pub peers: Vec<PeerSettings>,
    pub heartbeat: HeartbeatSettings,
    pub tracking: TrackingSettings,
}

/// Identity this node announces to its peers
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Human-readable description sent in the banner
    #[serde(default = "default_description")]
    pub description: String,
    /// Services this node consumes (`core`, `tracking`, `custom:<id>`)
    #[serde(default)]
    pub client_services: Vec<String>,
    /// Services this node provides
    #[serde(default = "default_server_services")]
    pub server_services: Vec<String>,
}

fn default_description() -> String {
    "mesh-hub".to_string()
}

fn default_server_services() -> Vec<String> {
    vec!["core".to_string()]
}

impl NodeSettings {
    /// Parsed client services
    pub fn client_services(&self) -> HubResult<Vec<ServiceType>> {
        parse_services(&self.client_services)
    }

    /// Parsed server services
    pub fn server_services(&self) -> HubResult<Vec<ServiceType>> {
        parse_services(&self.server_services)
    }
}

/// Listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Accept inbound connections
    #[serde(default = "default_true")]
    pub listen: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of runtime worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6000
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// A peer to dial at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerSettings {
    pub host: String,
    pub port: u16,
}

/// Heartbeat settings
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSettings {
    /// Seconds between ping rounds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_sec: u64,
}

fn default_ping_interval() -> u64 {
    30
}

impl HeartbeatSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_sec.max(1))
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        HeartbeatSettings {
            ping_interval_sec: default_ping_interval(),
        }
    }
}

/// Tracked request settings
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingSettings {
    /// Default seconds to wait for a tracked reply
    #[serde(default = "default_tracking_timeout")]
    pub timeout_sec: u64,
}

fn default_tracking_timeout() -> u64 {
    5
}

impl TrackingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        TrackingSettings {
            timeout_sec: default_tracking_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load settings from a specific config file path (without extension)
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("node.description", default_description())?
            .set_default("node.client_services", Vec::<String>::new())?
            .set_default("node.server_services", default_server_services())?
            .set_default("server.listen", true)?
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("heartbeat.ping_interval_sec", default_ping_interval() as i64)?
            .set_default("tracking.timeout_sec", default_tracking_timeout() as i64)?
            // Add config file if it exists
            .add_source(File::with_name(config_path.to_str().unwrap_or("config")).required(false))
            // Add environment variables with prefix MESH_HUB__
            .add_source(
                Environment::with_prefix("MESH_HUB")
                    .prefix_separator("__")
                    .separator("__"),
            );

        builder.build()?.try_deserialize()
    }

    /// Settings with built-in defaults only, ignoring files and environment
    pub fn defaults() -> Self {
        Settings {
            node: NodeSettings {
                description: default_description(),
                client_services: Vec::new(),
                server_services: default_server_services(),
            },
            server: ServerSettings {
                listen: true,
                host: default_host(),
                port: default_port(),
                workers: default_workers(),
            },
            peers: Vec::new(),
            heartbeat: HeartbeatSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        // Provide built-in defaults if config loading fails
        Settings::load().unwrap_or_else(|_| Settings::defaults())
    }
}
