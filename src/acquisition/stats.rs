//! Measurement-rate statistics
//!
//! Tumbling window: reports are counted until the window length has
//! elapsed, the rate of that window is published, and counting starts over.
//! A session restarts its window on every reset.

use std::time::{Duration, Instant};

/// Default window length
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(2);

/// Reports-per-second over fixed, non-overlapping windows
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    started: Instant,
    count: u64,
    total: u64,
    last_rate: Option<f64>,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            started: now,
            count: 0,
            total: 0,
            last_rate: None,
        }
    }

    /// Count one report now
    pub fn record(&mut self) -> Option<f64> {
        self.record_at(Instant::now())
    }

    /// Count one report at `now`; returns the rate when a window closes
    pub fn record_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        self.total += 1;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.last_rate = Some(rate);
        self.started = now;
        self.count = 0;
        Some(rate)
    }

    /// Drop the current window and the published rate
    pub fn restart(&mut self) {
        self.restart_at(Instant::now());
    }

    pub fn restart_at(&mut self, now: Instant) {
        self.started = now;
        self.count = 0;
        self.last_rate = None;
    }

    /// Rate of the last completed window
    pub fn rate(&self) -> Option<f64> {
        self.last_rate
    }

    /// Reports counted since creation
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}
