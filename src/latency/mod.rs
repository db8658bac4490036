//! Sliding-window request latency recorder.
//!
//! Keeps the most recent `capacity` request durations and a lifetime request
//! counter. Percentiles use the nearest-rank method with a floor index:
//! `index = floor(len * p / 100)`, clamped to `len - 1`. Because of the floor,
//! `percentile(100.0)` is always the last sorted element but e.g.
//! `percentile(50.0)` over four samples is the third one, not a midpoint.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW_SIZE: usize = 1000;

struct Window {
    samples: VecDeque<Duration>,
    total_requests: u64,
}

/// Thread-safe bounded latency window shared by the timing middleware and
/// the stats endpoint.
pub struct LatencyRecorder {
    window: RwLock<Window>,
    capacity: usize,
    started_at: Instant,
}

/// One consistent read of every latency figure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub average: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub count: usize,
    pub total_requests: u64,
    pub uptime: Duration,
    pub qps: f64,
}

impl LatencyRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: RwLock::new(Window {
                samples: VecDeque::with_capacity(capacity),
                total_requests: 0,
            }),
            capacity,
            started_at: Instant::now(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Window> {
        self.window.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Window> {
        self.window.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one request duration, evicting the oldest sample when full
    pub fn record(&self, latency: Duration) {
        let mut window = self.write();
        window.total_requests += 1;
        if window.samples.len() >= self.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(latency);
    }

    pub fn average(&self) -> Duration {
        average_of(&self.read().samples)
    }

    /// Nearest-rank percentile, `p` is clamped into `[0, 100]`
    pub fn percentile(&self, p: f64) -> Duration {
        let sorted = {
            let window = self.read();
            sorted_copy(&window.samples)
        };
        nearest_rank(&sorted, p)
    }

    pub fn count(&self) -> usize {
        self.read().samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_requests(&self) -> u64 {
        self.read().total_requests
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn qps(&self) -> f64 {
        let total = self.total_requests();
        qps_for(total, self.uptime())
    }

    /// Samples currently in the window, oldest first
    pub fn samples(&self) -> Vec<Duration> {
        self.read().samples.iter().copied().collect()
    }

    pub fn summary(&self) -> LatencySummary {
        let (sorted, average, total_requests) = {
            let window = self.read();
            (
                sorted_copy(&window.samples),
                average_of(&window.samples),
                window.total_requests,
            )
        };
        let uptime = self.uptime();

        LatencySummary {
            average,
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            count: sorted.len(),
            total_requests,
            uptime,
            qps: qps_for(total_requests, uptime),
        }
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

fn sorted_copy(samples: &VecDeque<Duration>) -> Vec<Duration> {
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    sorted
}

fn average_of(samples: &VecDeque<Duration>) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = samples.iter().map(Duration::as_nanos).sum();
    let mean = total / samples.len() as u128;
    Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX))
}

fn nearest_rank(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let index = (sorted.len() as f64 * p / 100.0) as usize;
    sorted[index.min(sorted.len() - 1)]
}

fn qps_for(total_requests: u64, uptime: Duration) -> f64 {
    let secs = uptime.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    total_requests as f64 / secs
}
