use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Optional relational store, only used for gauges on the stats page
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Upper bound for the graceful drain of open sockets, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Connection attempts made at startup before giving up (service still starts)
    #[serde(default = "default_warm_up_attempts")]
    pub warm_up_attempts: u32,
}

/// Which counter store backs the online-user set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_presence_backend")]
    pub backend: PresenceBackendKind,
    /// Sorted-set key holding user_id -> open connection count
    #[serde(default = "default_presence_key")]
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    /// Scalar query reported as `totalViews`
    #[serde(default = "default_views_query")]
    pub views_query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    /// Number of most recent request durations kept for percentiles
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

/// What the server does with a frame received from a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePolicy {
    /// Send the frame back to its sender only
    Echo,
    /// Fan the frame out to every local connection
    Relay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Outbound queue depth per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Per-peer deadline for a broadcast send, in milliseconds
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    #[serde(default = "default_message_policy")]
    pub message_policy: MessagePolicy,
    #[serde(default = "default_max_user_id_len")]
    pub max_user_id_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Deadline for each external gauge call, in milliseconds
    #[serde(default = "default_gauge_timeout_ms")]
    pub gauge_timeout_ms: u64,
    /// Key patterns counted as `cachedKeys`
    #[serde(default = "default_cache_key_patterns")]
    pub cache_key_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_warm_up_attempts() -> u32 {
    5
}

fn default_presence_backend() -> PresenceBackendKind {
    PresenceBackendKind::Redis
}

fn default_presence_key() -> String {
    "online_users".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_views_query() -> String {
    "SELECT COALESCE(SUM(view_count), 0)::BIGINT FROM article".to_string()
}

fn default_window_size() -> usize {
    1000
}

fn default_channel_buffer() -> usize {
    32
}

fn default_broadcast_timeout_ms() -> u64 {
    2000
}

fn default_message_policy() -> MessagePolicy {
    MessagePolicy::Echo
}

fn default_max_user_id_len() -> usize {
    128
}

fn default_gauge_timeout_ms() -> u64 {
    500
}

fn default_cache_key_patterns() -> Vec<String> {
    vec![
        "article*".to_string(),
        "online*".to_string(),
        "session*".to_string(),
    ]
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "presence-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("redis.url", default_redis_url())?
            .set_default("presence.key", default_presence_key())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, REDIS__URL, LATENCY__WINDOW_SIZE, DATABASE__URL, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .with_list_parse_key("stats.cache_key_patterns"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}

impl StatsConfig {
    pub fn gauge_timeout(&self) -> Duration {
        Duration::from_millis(self.gauge_timeout_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            presence: PresenceConfig::default(),
            database: None,
            latency: LatencyConfig::default(),
            websocket: WebSocketConfig::default(),
            stats: StatsConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            warm_up_attempts: default_warm_up_attempts(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            backend: default_presence_backend(),
            key: default_presence_key(),
        }
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            message_policy: default_message_policy(),
            max_user_id_len: default_max_user_id_len(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            gauge_timeout_ms: default_gauge_timeout_ms(),
            cache_key_patterns: default_cache_key_patterns(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
