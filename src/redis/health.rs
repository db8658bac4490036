//! Reachability tracking for the shared counter store

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreHealthStatus {
    Healthy = 0,
    Reconnecting = 1,
    CircuitOpen = 2,
}

impl StoreHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreHealthStatus::Healthy => "healthy",
            StoreHealthStatus::Reconnecting => "reconnecting",
            StoreHealthStatus::CircuitOpen => "circuit_open",
        }
    }
}

impl From<u8> for StoreHealthStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => StoreHealthStatus::Healthy,
            2 => StoreHealthStatus::CircuitOpen,
            _ => StoreHealthStatus::Reconnecting,
        }
    }
}

pub struct StoreHealth {
    status: AtomicU8,
    last_connected_ms: AtomicI64,
    reconnections: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct StoreHealthStats {
    pub status: StoreHealthStatus,
    pub last_connected_ms: i64,
    pub total_reconnections: u32,
}

impl StoreHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(StoreHealthStatus::Reconnecting as u8),
            last_connected_ms: AtomicI64::new(0),
            reconnections: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(StoreHealthStatus::Healthy as u8, Ordering::AcqRel);
        let last = self
            .last_connected_ms
            .swap(chrono::Utc::now().timestamp_millis(), Ordering::AcqRel);

        // First connect is not a reconnection
        if previous != StoreHealthStatus::Healthy as u8 && last != 0 {
            self.reconnections.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(StoreHealthStatus::Reconnecting as u8, Ordering::Release);
    }

    pub fn set_circuit_open(&self) {
        self.status
            .store(StoreHealthStatus::CircuitOpen as u8, Ordering::Release);
    }

    pub fn status(&self) -> StoreHealthStatus {
        StoreHealthStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == StoreHealthStatus::Healthy
    }

    pub fn stats(&self) -> StoreHealthStats {
        StoreHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected_ms.load(Ordering::Acquire),
            total_reconnections: self.reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for StoreHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = StoreHealth::new();
        assert_eq!(health.status(), StoreHealthStatus::Reconnecting);
        assert!(!health.is_healthy());

        health.set_connected();
        assert!(health.is_healthy());
        assert!(health.stats().last_connected_ms > 0);

        health.set_circuit_open();
        assert_eq!(health.status(), StoreHealthStatus::CircuitOpen);
        assert_eq!(health.status().as_str(), "circuit_open");
    }

    #[test]
    fn test_reconnection_count() {
        let health = StoreHealth::new();
        health.set_connected();
        assert_eq!(health.stats().total_reconnections, 0);

        health.set_reconnecting();
        health.set_connected();
        assert_eq!(health.stats().total_reconnections, 1);
    }
}
