//! Configuration for the navigation relay
//!
//! Every tunable that used to live as a literal in the relay (database
//! credentials, bridge endpoint, listen port, covariance threshold, yaw
//! buckets, motion constants) is a field here. Sources are layered:
//! defaults, then a TOML or JSON file, then `NAVRELAY_*` environment
//! variables. Command line flags are applied last by the binary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Station database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    /// Table holding the station rows
    pub table: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            user: "navrelay".to_string(),
            password: String::new(),
            database: "myDB".to_string(),
            port: 3306,
            table: "my_station".to_string(),
        }
    }
}

/// rosbridge connection settings and topic names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub url: String,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub goal_topic: String,
    pub cancel_topic: String,
    pub result_topic: String,
    pub cmd_vel_topic: String,
    pub covariance_topic: String,
    pub clear_costmaps_service: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090".to_string(),
            reconnect_backoff_ms: 3000,
            connect_timeout_secs: 5,
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 5,
            goal_topic: "/move_base/goal".to_string(),
            cancel_topic: "/move_base/cancel".to_string(),
            result_topic: "/move_base/result".to_string(),
            cmd_vel_topic: "/cmd_vel".to_string(),
            covariance_topic: "/amcl_pose".to_string(),
            clear_costmaps_service: "/move_base/clear_costmaps".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Operator-facing TCP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub listen_port: u16,
    /// Close a connection after this many seconds without input. `None` keeps it open.
    pub idle_timeout_secs: Option<u64>,
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            listen_port: 5000,
            idle_timeout_secs: None,
            max_line_length: 1024,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Localization gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// x/y covariance below which localization counts as converged
    pub covariance_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            covariance_threshold: 0.4,
        }
    }
}

/// Yaw buckets used to snap stored headings to cardinal directions.
/// All values are degrees and the buckets are symmetric around zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// `[-forward_tolerance, forward_tolerance]` snaps to 0°
    pub forward_tolerance: f64,
    /// `[side_min, side_max]` snaps to 90°, the mirrored range to -90°
    pub side_min: f64,
    pub side_max: f64,
    /// `yaw >= reverse_min` or `yaw <= -reverse_min` snaps to 180°
    pub reverse_min: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            forward_tolerance: 30.0,
            side_min: 60.0,
            side_max: 120.0,
            reverse_min: 150.0,
        }
    }
}

/// Motion constants for open-loop rotation and arrival handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// rad/s used by `turn:` commands
    pub angular_speed: f64,
    pub rotate_publish_interval_ms: u64,
    /// Wait after an arrival before clearing costmaps
    pub settle_delay_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            angular_speed: 0.3,
            rotate_publish_interval_ms: 100,
            settle_delay_ms: 3000,
        }
    }
}

impl MotionConfig {
    pub fn rotate_publish_interval(&self) -> Duration {
        Duration::from_millis(self.rotate_publish_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Offline mode without a robot or database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub arrival_delay_ms: u64,
    /// JSON or TOML file with a `stations` array; used instead of the database
    pub stations_file: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            arrival_delay_ms: 5000,
            stations_file: None,
        }
    }
}

impl SimulationConfig {
    pub fn arrival_delay(&self) -> Duration {
        Duration::from_millis(self.arrival_delay_ms)
    }
}

/// Top-level relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub db: DbConfig,
    pub bridge: BridgeConfig,
    pub server: ServerConfig,
    pub gate: GateConfig,
    pub normalizer: NormalizerConfig,
    pub motion: MotionConfig,
    pub simulation: SimulationConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML or JSON file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path, e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from a string, trying JSON before TOML
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim_start().starts_with('{') {
            return serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()));
        }
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Overlay `NAVRELAY_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from an arbitrary lookup (the process environment in production)
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("NAVRELAY_DB_HOST") {
            self.db.host = host;
        }
        if let Some(user) = lookup("NAVRELAY_DB_USER") {
            self.db.user = user;
        }
        if let Some(password) = lookup("NAVRELAY_DB_PASSWORD") {
            self.db.password = password;
        }
        if let Some(database) = lookup("NAVRELAY_DB_DATABASE") {
            self.db.database = database;
        }
        if let Some(port) = lookup("NAVRELAY_DB_PORT") {
            self.db.port = port
                .parse()
                .map_err(|_| ConfigError::ParseError(format!("NAVRELAY_DB_PORT: invalid port '{}'", port)))?;
        }
        if let Some(url) = lookup("NAVRELAY_BRIDGE_URL") {
            self.bridge.url = url;
        }
        if let Some(port) = lookup("NAVRELAY_LISTEN_PORT") {
            self.server.listen_port = port
                .parse()
                .map_err(|_| ConfigError::ParseError(format!("NAVRELAY_LISTEN_PORT: invalid port '{}'", port)))?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_port == 0 {
            return Err(ConfigError::ValidationError("server.listen_port cannot be 0".to_string()));
        }
        if self.server.max_line_length == 0 {
            return Err(ConfigError::ValidationError("server.max_line_length must be > 0".to_string()));
        }
        if self.server.idle_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError("server.idle_timeout_secs must be > 0 when set".to_string()));
        }
        if self.bridge.url.is_empty() {
            return Err(ConfigError::ValidationError("bridge.url cannot be empty".to_string()));
        }
        if self.bridge.heartbeat_interval_secs == 0 || self.bridge.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("bridge heartbeat interval and timeout must be > 0".to_string()));
        }
        if !(self.gate.covariance_threshold > 0.0) {
            return Err(ConfigError::ValidationError("gate.covariance_threshold must be > 0".to_string()));
        }
        if !(self.motion.angular_speed > 0.0) {
            return Err(ConfigError::ValidationError("motion.angular_speed must be > 0".to_string()));
        }
        if self.motion.rotate_publish_interval_ms == 0 {
            return Err(ConfigError::ValidationError("motion.rotate_publish_interval_ms must be > 0".to_string()));
        }

        let n = &self.normalizer;
        let ordered = 0.0 <= n.forward_tolerance
            && n.forward_tolerance <= n.side_min
            && n.side_min <= n.side_max
            && n.side_max <= n.reverse_min
            && n.reverse_min <= 180.0;
        if !ordered {
            return Err(ConfigError::ValidationError(
                "normalizer buckets must satisfy 0 <= forward_tolerance <= side_min <= side_max <= reverse_min <= 180".to_string(),
            ));
        }

        if self.db.table.is_empty() || !self.db.table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::ValidationError(format!("db.table '{}' is not a plain identifier", self.db.table)));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
