// SPDX-License-Identifier: GPL-3.0-only

//! Frame-rate degradation monitor fed from `on_stats`
//!
//! Keeps an exponential moving average of the reported fps. Sudden drops far
//! below the average are treated as outliers and ignored until they persist,
//! and the degraded flag uses separate enter/leave thresholds so it does not
//! flap around a single cut-off.

use super::stats::PerformanceStats;
use crate::constants::performance::{
    DEFAULT_FPS, DEVIATION_LIMIT, EMA_ALPHA, FPS_WARNING_LOWER, FPS_WARNING_UPPER,
    OUTLIER_PERSISTENCE,
};
use serde::Serialize;
use tracing::{info, warn};

/// Why the pipeline is considered degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationReason {
    /// Processed frame rate fell below the warning threshold
    FrameDrop,
    /// The encoder reported being limited by CPU
    CpuThrottling,
}

/// Current assessment of pipeline performance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStatus {
    pub degraded: bool,
    pub reasons: Vec<DegradationReason>,
    pub average_fps: f64,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    ema: f64,
    outlier_streak: u32,
    frame_drop: bool,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            ema: DEFAULT_FPS,
            outlier_streak: 0,
            frame_drop: false,
        }
    }

    pub fn average_fps(&self) -> f64 {
        self.ema
    }

    /// Fold one stats sample into the average
    pub fn observe(&mut self, stats: &PerformanceStats) {
        let fps = stats.fps;
        if !fps.is_finite() || fps < 0.0 {
            self.reset();
            return;
        }

        let deviation = if self.ema > 0.0 {
            (fps - self.ema).abs() / self.ema
        } else {
            0.0
        };
        if fps < self.ema && deviation > DEVIATION_LIMIT {
            self.outlier_streak += 1;
            if self.outlier_streak < OUTLIER_PERSISTENCE {
                return;
            }
        } else {
            self.outlier_streak = 0;
        }

        self.ema = EMA_ALPHA * fps + (1.0 - EMA_ALPHA) * self.ema;

        if !self.frame_drop && self.ema < FPS_WARNING_LOWER {
            self.frame_drop = true;
            warn!(average_fps = self.ema, "Video filter frame rate degraded");
        } else if self.frame_drop && self.ema > FPS_WARNING_UPPER {
            self.frame_drop = false;
            info!(average_fps = self.ema, "Video filter frame rate recovered");
        }
    }

    /// Current status; `cpu_limited` reflects the encoder's quality limitation
    ///
    /// CPU throttling is only reported alongside a frame drop.
    pub fn status(&self, cpu_limited: bool) -> PerformanceStatus {
        let mut reasons = Vec::new();
        if self.frame_drop {
            reasons.push(DegradationReason::FrameDrop);
            if cpu_limited {
                reasons.push(DegradationReason::CpuThrottling);
            }
        }
        PerformanceStatus {
            degraded: !reasons.is_empty(),
            reasons,
            average_fps: self.ema,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(fps: f64) -> PerformanceStats {
        PerformanceStats {
            delay: 5.0,
            fps,
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_single_outlier_is_ignored() {
        let mut monitor = PerformanceMonitor::new();
        monitor.observe(&sample(5.0));
        assert_eq!(monitor.average_fps(), DEFAULT_FPS);
        assert!(!monitor.status(false).degraded);
    }

    #[test]
    fn test_persistent_drop_degrades_and_recovers() {
        let mut monitor = PerformanceMonitor::new();
        for _ in 0..20 {
            monitor.observe(&sample(18.0));
        }
        let status = monitor.status(true);
        assert!(status.degraded);
        assert_eq!(
            status.reasons,
            vec![DegradationReason::FrameDrop, DegradationReason::CpuThrottling]
        );

        // Still below the upper threshold: stays degraded
        monitor.observe(&sample(24.0));
        assert!(monitor.status(false).degraded);

        for _ in 0..30 {
            monitor.observe(&sample(30.0));
        }
        assert!(!monitor.status(true).degraded);
        assert!(monitor.status(true).reasons.is_empty());
    }

    #[test]
    fn test_invalid_sample_resets() {
        let mut monitor = PerformanceMonitor::new();
        monitor.observe(&sample(28.0));
        monitor.observe(&sample(f64::NAN));
        assert_eq!(monitor.average_fps(), DEFAULT_FPS);
    }
}
