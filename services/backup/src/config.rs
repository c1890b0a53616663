use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the backup service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// MQTT broker configuration
    pub mqtt: MqttConfig,
    /// S3 / MinIO configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Object placement configuration
    #[serde(default)]
    pub placement: PlacementConfig,
    /// Listener supervision configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Health API configuration
    #[serde(default)]
    pub api: ApiConfig,
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
    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// MQTT broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker host name
    pub host: String,
    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Client identifier presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic root; the service subscribes to `{topic_root}/+/+`
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    /// Subscription QoS (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Start a clean session on every connect
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Broker username
    pub username: Option<String>,
    /// Broker password
    pub password: Option<String>,
    /// Maximum packet size in bytes. Defaults to the MQTT protocol limit; a
    /// larger incoming packet is a connection error in the client.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size_bytes: usize,
    /// Capacity of the client request channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding all backed-up objects
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default = "default_true")]
    pub force_path_style: bool,
    /// Static access key
    pub access_key: Option<String>,
    /// Static secret key
    pub secret_key: Option<String>,
    /// Create the bucket at startup when it does not exist
    #[serde(default = "default_true")]
    pub create_bucket: bool,
}

/// What to do when a minute bucket already holds objects
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Last write wins
    #[default]
    Overwrite,
    /// Keep existing objects and write under `{HH}-{mm}-{n}`
    Preserve,
}

/// Object placement configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlacementConfig {
    /// Same-minute collision handling
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
}

/// Restart policy for the intake listener
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum consecutive failed runs before giving up (0 = infinite)
    #[serde(default)]
    pub max_restarts: u32,
    /// Base delay between restarts in milliseconds
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,
    /// Maximum delay between restarts in milliseconds
    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,
}

/// Health API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "backup-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "biofield-backup".to_string()
}

fn default_topic_root() -> String {
    "/biofield-signal".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Largest remaining length an MQTT packet can encode
pub const MQTT_MAX_PACKET_SIZE: usize = 268_435_455;

fn default_max_packet_size() -> usize {
    MQTT_MAX_PACKET_SIZE
}

fn default_channel_capacity() -> usize {
    10
}

fn default_bucket() -> String {
    "bio-field-data-backup".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_restart_base_delay_ms() -> u64 {
    1000
}

fn default_restart_max_delay_ms() -> u64 {
    30000
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/backup").required(false))
            .add_source(config::File::with_name("/etc/biofield/backup").required(false))
            // Override with environment variables
            // BACKUP__MQTT__HOST -> mqtt.host
            .add_source(
                config::Environment::with_prefix("BACKUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl MqttConfig {
    /// Subscription filter matching `{root}/{device}/{sensor}`
    pub fn topic_filter(&self) -> String {
        format!("{}/+/+", self.topic_root.trim_end_matches('/'))
    }

    /// Get keep-alive interval as Duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl SupervisorConfig {
    /// Get base restart delay as Duration
    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    /// Get maximum restart delay as Duration
    pub fn restart_max_delay(&self) -> Duration {
        Duration::from_millis(self.restart_max_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: true,
            access_key: None,
            secret_key: None,
            create_bucket: true,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 0,
            restart_base_delay_ms: default_restart_base_delay_ms(),
            restart_max_delay_ms: default_restart_max_delay_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        let source = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .unwrap();
        source.try_deserialize().unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(r#"{ "mqtt": { "host": "broker.local" } }"#);

        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.max_packet_size_bytes, MQTT_MAX_PACKET_SIZE);
        assert_eq!(config.s3.bucket, "bio-field-data-backup");
        assert!(config.s3.force_path_style);
        assert_eq!(config.placement.collision_policy, CollisionPolicy::Overwrite);
        assert_eq!(config.supervisor.max_restarts, 0);
        assert_eq!(config.api.port, 8000);
    }

    #[test]
    fn test_collision_policy_parsing() {
        let config = parse(
            r#"{ "mqtt": { "host": "h" }, "placement": { "collision_policy": "preserve" } }"#,
        );
        assert_eq!(config.placement.collision_policy, CollisionPolicy::Preserve);
    }

    #[test]
    fn test_topic_filter_trims_trailing_separator() {
        let mut config = parse(r#"{ "mqtt": { "host": "h" } }"#).mqtt;
        assert_eq!(config.topic_filter(), "/biofield-signal/+/+");

        config.topic_root = "/lab/".to_string();
        assert_eq!(config.topic_filter(), "/lab/+/+");
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_packet_size(), 268_435_455);
        assert_eq!(default_restart_base_delay_ms(), 1000);
        assert_eq!(default_restart_max_delay_ms(), 30000);
    }
}
