mod settings;

pub use settings::{
    DatabaseConfig, LatencyConfig, MessagePolicy, OtelConfig, PresenceBackendKind,
    PresenceConfig, RedisConfig, ServerConfig, Settings, StatsConfig, WebSocketConfig,
};
