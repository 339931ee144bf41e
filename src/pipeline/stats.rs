// SPDX-License-Identifier: GPL-3.0-only

//! Rolling frame statistics

use crate::constants::STATS_WINDOW;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Statistics emitted once per window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    /// Mean transform time in milliseconds, two decimals
    pub delay: f64,
    /// Frames processed per second over the window, rounded
    pub fps: f64,
    /// Milliseconds since the window origin when the stats were emitted
    pub timestamp: f64,
}

/// Accumulates `(frame count, cumulative delay)` and emits once per window
///
/// The caller supplies `now` so the window can be driven by a fake clock.
#[derive(Debug)]
pub struct StatsWindow {
    origin: Instant,
    window: Duration,
    frames: u32,
    total_delay: Duration,
    window_start: Option<Instant>,
}

impl StatsWindow {
    pub fn new(origin: Instant) -> Self {
        Self::with_window(origin, STATS_WINDOW)
    }

    pub fn with_window(origin: Instant, window: Duration) -> Self {
        Self {
            origin,
            window,
            frames: 0,
            total_delay: Duration::ZERO,
            window_start: None,
        }
    }

    /// Frames counted in the current window
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Record one transformed frame and its transform time
    ///
    /// The first frame only opens the window. Once a full window has elapsed
    /// the accumulated stats are returned and the counters reset.
    pub fn record(&mut self, delay: Duration, now: Instant) -> Option<PerformanceStats> {
        self.frames += 1;
        self.total_delay += delay;

        let Some(window_start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };

        let elapsed = now.saturating_duration_since(window_start);
        if elapsed < self.window {
            return None;
        }

        let mean_ms = self.total_delay.as_secs_f64() * 1000.0 / f64::from(self.frames);
        let stats = PerformanceStats {
            delay: (mean_ms * 100.0).round() / 100.0,
            fps: (f64::from(self.frames) / elapsed.as_secs_f64()).round(),
            timestamp: now.saturating_duration_since(self.origin).as_secs_f64() * 1000.0,
        };

        self.frames = 0;
        self.total_delay = Duration::ZERO;
        self.window_start = Some(now);
        Some(stats)
    }
}
