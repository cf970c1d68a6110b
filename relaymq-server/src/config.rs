//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RELAYMQ_CONFIG)
//! 3. Environment variables

use crate::keystore::Certificate;
use relaymq_codec::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_NESTING_DEPTH, MIN_MAX_FRAME_SIZE};
use relaymq_store::{FsyncPolicy, StoreConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default days between certificate expiry checks.
pub const DEFAULT_CERTIFICATE_EXPIRY_CHECK_FREQUENCY: i64 = 1;

/// Default warning window for expiring certificates, in days.
pub const DEFAULT_CERTIFICATE_EXPIRY_WARN_DAYS: i64 = 30;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Transaction configuration.
    pub transactions: TransactionsConfig,
    /// Wire codec limits.
    pub codec: CodecConfig,
    /// Key stores and expiry checking.
    pub keystores: KeyStoresConfig,
    /// Exchanges declared at startup, as attribute maps.
    pub exchanges: Vec<Map<String, Value>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            transactions: TransactionsConfig::default(),
            codec: CodecConfig::default(),
            keystores: KeyStoresConfig::default(),
            exchanges: default_exchanges(),
        }
    }
}

fn default_exchanges() -> Vec<Map<String, Value>> {
    [
        ("amq.direct", "direct"),
        ("amq.fanout", "fanout"),
        ("amq.match", "headers"),
        ("amq.topic", "topic"),
    ]
    .into_iter()
    .map(|(name, exchange_type)| {
        let mut attributes = Map::new();
        attributes.insert("name".to_string(), Value::from(name));
        attributes.insert("type".to_string(), Value::from(exchange_type));
        attributes.insert("durable".to_string(), Value::Bool(true));
        attributes
    })
    .collect()
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RELAYMQ_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.storage.apply_env_overrides();
        self.transactions.apply_env_overrides();
        self.codec.apply_env_overrides();
        self.keystores.apply_env_overrides();
    }

    /// Checks the configuration before the broker starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        self.codec.validate()?;
        self.keystores.validate()?;

        let mut names = HashSet::new();
        for attributes in &self.exchanges {
            let name = attributes
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ConfigError::ValidationError("every exchange needs a string 'name'".to_string())
                })?;
            if !names.insert(name) {
                return Err(ConfigError::ValidationError(format!(
                    "exchange '{}' is declared more than once",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5672)),
            idle_timeout_secs: 300,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RELAYMQ_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("RELAYMQ_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("RELAYMQ_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Fsync policy for commit records.
    pub fsync_policy: FsyncPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("RELAYMQ_DATA") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(policy) = std::env::var("RELAYMQ_FSYNC_POLICY") {
            self.fsync_policy = parse_fsync_policy(&policy);
        }
    }

    /// Returns the message store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("messages")
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.store_dir()).with_fsync_policy(self.fsync_policy)
    }
}

fn parse_fsync_policy(policy: &str) -> FsyncPolicy {
    match policy.to_lowercase().as_str() {
        "every_write" | "everywrite" => FsyncPolicy::EveryWrite,
        "never" => FsyncPolicy::Never,
        s if s.starts_with("every_n:") => {
            let n = s[8..].parse().unwrap_or(100);
            FsyncPolicy::EveryN(n)
        }
        _ => FsyncPolicy::EveryWrite,
    }
}

/// Transaction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionsConfig {
    /// Uncommitted content a transaction may hold in memory before its
    /// messages are flowed to disk.
    pub max_uncommitted_in_memory_bytes: u64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            max_uncommitted_in_memory_bytes: 10 * 1024 * 1024,
        }
    }
}

impl TransactionsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("RELAYMQ_TXN_MAX_UNCOMMITTED_BYTES") {
            if let Ok(n) = size.parse() {
                self.max_uncommitted_in_memory_bytes = n;
            }
        }
    }
}

/// Wire codec limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Largest frame accepted or sent.
    pub max_frame_size: u32,
    /// Deepest nesting of compound and described values.
    pub max_nesting_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl CodecConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("RELAYMQ_MAX_FRAME_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_frame_size = n;
            }
        }

        if let Ok(depth) = std::env::var("RELAYMQ_MAX_NESTING_DEPTH") {
            if let Ok(n) = depth.parse() {
                self.max_nesting_depth = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "codec.max_frame_size must be at least {}",
                MIN_MAX_FRAME_SIZE
            )));
        }
        if self.max_nesting_depth == 0 {
            return Err(ConfigError::ValidationError(
                "codec.max_nesting_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Key store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoresConfig {
    /// Days between certificate expiry checks. Values below 1 fall back to
    /// the default when the check is scheduled.
    pub expiry_check_frequency_days: i64,
    /// Certificates expiring within this many days are reported.
    pub expiry_warn_days: i64,
    /// Configured key stores.
    pub stores: Vec<KeyStoreConfig>,
}

impl Default for KeyStoresConfig {
    fn default() -> Self {
        Self {
            expiry_check_frequency_days: DEFAULT_CERTIFICATE_EXPIRY_CHECK_FREQUENCY,
            expiry_warn_days: DEFAULT_CERTIFICATE_EXPIRY_WARN_DAYS,
            stores: Vec::new(),
        }
    }
}

impl KeyStoresConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(frequency) = std::env::var("RELAYMQ_CERT_EXPIRY_CHECK_FREQUENCY") {
            match frequency.parse() {
                Ok(days) => self.expiry_check_frequency_days = days,
                Err(e) => tracing::warn!(
                    "Cannot parse RELAYMQ_CERT_EXPIRY_CHECK_FREQUENCY '{}': {}",
                    frequency,
                    e
                ),
            }
        }

        if let Ok(days) = std::env::var("RELAYMQ_CERT_EXPIRY_WARN_DAYS") {
            if let Ok(n) = days.parse() {
                self.expiry_warn_days = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry_warn_days < 0 {
            return Err(ConfigError::ValidationError(
                "keystores.expiry_warn_days must not be negative".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "key store name must not be empty".to_string(),
                ));
            }
            if !names.insert(store.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "key store '{}' is declared more than once",
                    store.name
                )));
            }
        }
        Ok(())
    }
}

/// A single key store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub name: String,
    pub certificates: Vec<Certificate>,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
