//! Time utilities for the match loop

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Match loop rate
pub const MATCH_TPS: u64 = 10; // 100 ms ticks
pub const TICK_DURATION: Duration = Duration::from_millis(1000 / MATCH_TPS);

/// How long a created match waits for its players before giving up
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Converts wall-clock ticks into whole-millisecond steps for the game clock,
/// carrying the sub-millisecond remainder so nothing drifts.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the previous call
    pub fn step_ms(&mut self) -> u64 {
        self.step_at(Instant::now())
    }

    fn step_at(&mut self, now: Instant) -> u64 {
        let ms = now.saturating_duration_since(self.last).as_millis() as u64;
        self.last += Duration::from_millis(ms);
        ms
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
