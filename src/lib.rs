// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
pub mod telemetry;

// Core components
pub mod connection_manager;
pub mod latency;
pub mod presence;
pub mod stats;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
