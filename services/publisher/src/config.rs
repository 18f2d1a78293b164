//! Configuration for the claim-check publisher.
//!
//! Settings are layered: built-in defaults, then `config/publisher.*`, then
//! `/etc/claimcheck/publisher.*`, then `PUBLISHER__*` environment variables.

use crate::channel::Qos;
use crate::object_store::{StorageCredentials, StorageEndpoint};
use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to create client: {0}")]
    ClientCreation(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// Main configuration for the publisher service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Object store configuration
    pub storage: StorageConfig,
    /// Filesystem store configuration
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    /// Publish defaults
    #[serde(default)]
    pub publish: PublishConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Object store host
    pub address: String,
    /// Object store port
    #[serde(default = "default_storage_port")]
    pub port: String,
    /// Access key id; empty means use the ambient credential chain
    #[serde(default)]
    pub access_key_id: String,
    /// Secret access key
    #[serde(default)]
    pub secret_access_key: String,
    /// Use TLS (recommended in production)
    #[serde(default)]
    pub use_ssl: bool,
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Force path-style access (required for MinIO)
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

/// Filesystem store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    /// Directory for video payloads
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,
}

/// Defaults applied to each publish
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Delivery guarantee requested from the channel
    #[serde(default)]
    pub qos: Qos,
    /// Ask the channel to retain the last descriptor
    #[serde(default)]
    pub retained: bool,
    /// Deadline for a whole publish call in seconds (0 = none)
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

/// Security protocol for Kafka connections
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }
}

/// SASL mechanism for authentication
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaslMechanism {
    #[default]
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SSL/TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SslConfig {
    /// Path to CA certificate file
    pub ca_location: Option<String>,
    /// Path to client certificate file
    pub certificate_location: Option<String>,
    /// Path to client private key file
    pub key_location: Option<String>,
}

/// SASL authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaslConfig {
    #[serde(default)]
    pub mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Retry and reliability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Number of retries for failed sends
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Enable idempotent producer
    #[serde(default = "default_true")]
    pub enable_idempotence: bool,
    /// Required acknowledgments: 0, 1, or -1 (all)
    #[serde(default = "default_acks")]
    pub acks: String,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            enable_idempotence: true,
            acks: default_acks(),
        }
    }
}

/// Consumer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group ID
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Auto offset reset: earliest, latest, none
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
    /// Descriptor topics to subscribe to
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            session_timeout_ms: default_session_timeout(),
            topics: Vec::new(),
        }
    }
}

/// Kafka connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses
    pub bootstrap_servers: String,
    /// Client ID for this connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,
    /// SSL configuration
    #[serde(default)]
    pub ssl: SslConfig,
    /// SASL configuration
    #[serde(default)]
    pub sasl: SaslConfig,
    /// Reliability settings
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Additional Kafka properties
    #[serde(default)]
    pub extra_properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            security_protocol: SecurityProtocol::default(),
            ssl: SslConfig::default(),
            sasl: SaslConfig::default(),
            reliability: ReliabilityConfig::default(),
            consumer: ConsumerConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "claimcheck-publisher".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_storage_port() -> String {
    "9000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_video_dir() -> PathBuf {
    PathBuf::from("data/videos")
}

fn default_publish_timeout_secs() -> u64 {
    30
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "claimcheck-publisher".to_string()
}

fn default_group_id() -> String {
    "claimcheck-resolver".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout() -> u64 {
    30000
}

fn default_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            video_dir: default_video_dir(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            qos: Qos::default(),
            retained: false,
            timeout_secs: default_publish_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("kafka.bootstrap_servers", default_bootstrap_servers())?
            .set_default("storage.address", "localhost")?
            // Add config file if present
            .add_source(config::File::with_name("config/publisher").required(false))
            .add_source(config::File::with_name("/etc/claimcheck/publisher").required(false))
            // Override with environment variables
            // PUBLISHER__STORAGE__ADDRESS -> storage.address
            .add_source(
                config::Environment::with_prefix("PUBLISHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-section settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kafka.validate()?;

        if self.storage.address.is_empty() {
            return Err(ConfigError::MissingRequired("storage.address".to_string()));
        }
        if !self.storage.access_key_id.is_empty() && self.storage.secret_access_key.is_empty() {
            return Err(ConfigError::MissingRequired(
                "storage.secret_access_key (required with access_key_id)".to_string(),
            ));
        }

        Ok(())
    }

    /// Publish deadline, if one is configured
    pub fn publish_timeout(&self) -> Option<Duration> {
        match self.publish.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl StorageConfig {
    /// Object store endpoint described by this configuration
    pub fn endpoint(&self) -> StorageEndpoint {
        StorageEndpoint::new(&self.address, &self.port)
            .with_credentials(StorageCredentials::new(
                &self.access_key_id,
                &self.secret_access_key,
            ))
            .with_ssl(self.use_ssl)
            .with_region(&self.region)
    }
}

impl KafkaConfig {
    /// Create a new KafkaConfig with the specified bootstrap servers
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    /// Build a base rdkafka ClientConfig from this configuration
    fn build_base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("security.protocol", self.security_protocol.as_str());

        // SSL configuration
        if let Some(ref ca) = self.ssl.ca_location {
            config.set("ssl.ca.location", ca);
        }
        if let Some(ref cert) = self.ssl.certificate_location {
            config.set("ssl.certificate.location", cert);
        }
        if let Some(ref key) = self.ssl.key_location {
            config.set("ssl.key.location", key);
        }

        // SASL configuration
        if matches!(
            self.security_protocol,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        ) {
            config.set("sasl.mechanism", self.sasl.mechanism.as_str());
            if let Some(ref username) = self.sasl.username {
                config.set("sasl.username", username);
            }
            if let Some(ref password) = self.sasl.password {
                config.set("sasl.password", password);
            }
        }

        // Extra properties
        for (key, value) in &self.extra_properties {
            config.set(key, value);
        }

        config
    }

    /// Build a producer ClientConfig
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("retries", self.reliability.retries.to_string());
        config.set(
            "request.timeout.ms",
            self.reliability.request_timeout_ms.to_string(),
        );
        config.set("acks", &self.reliability.acks);

        if self.reliability.enable_idempotence {
            config.set("enable.idempotence", "true");
        }

        config
    }

    /// Build a consumer ClientConfig
    pub fn build_consumer_config(&self) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("group.id", &self.consumer.group_id);
        config.set("auto.offset.reset", &self.consumer.auto_offset_reset);
        config.set("enable.auto.commit", "false");
        config.set(
            "session.timeout.ms",
            self.consumer.session_timeout_ms.to_string(),
        );

        config
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.reliability.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingRequired(
                "kafka.bootstrap_servers".to_string(),
            ));
        }

        if self.consumer.group_id.is_empty() {
            return Err(ConfigError::MissingRequired(
                "kafka.consumer.group_id".to_string(),
            ));
        }

        if !matches!(self.reliability.acks.as_str(), "0" | "1" | "-1" | "all") {
            return Err(ConfigError::InvalidValue {
                key: "kafka.reliability.acks".to_string(),
                message: format!("unsupported value '{}'", self.reliability.acks),
            });
        }

        // Validate SASL config if using SASL
        match self.security_protocol {
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl => {
                if self.sasl.username.is_none() {
                    return Err(ConfigError::MissingRequired(
                        "kafka.sasl.username (required for SASL)".to_string(),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }
}
