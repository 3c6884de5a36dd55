//! Drift-corrected music clock.
//!
//! The audio player reports its position at its own cadence, which stutters
//! relative to the render loop. [`SyncClock`] advances by the frame delta for
//! smooth motion and pulls itself toward the reported audio time with a
//! proportional correction, snapping only when the two disagree by more than
//! the snap threshold (a seek or a genuine desync).

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;

/// One reading of the audio player, taken once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockSample {
    /// Caller's monotonic wall clock, in seconds.
    pub wall_clock: f64,
    /// Position reported by the audio player, in seconds.
    pub audio_time: f64,
}

impl ClockSample {
    pub fn new(wall_clock: f64, audio_time: f64) -> Self {
        Self {
            wall_clock,
            audio_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncClock {
    snap_threshold: f64,
    correction_gain: f64,
    smoothed: f64,
    last_wall_clock: Option<f64>,
    snaps: u64,
}

impl SyncClock {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            snap_threshold: config.snap_threshold,
            correction_gain: config.correction_gain,
            smoothed: 0.0,
            last_wall_clock: None,
            snaps: 0,
        }
    }

    /// Current smoothed music time.
    pub fn now(&self) -> f64 {
        self.smoothed
    }

    /// Number of hard snaps taken since the last reset.
    pub fn snap_count(&self) -> u64 {
        self.snaps
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.last_wall_clock = None;
        self.snaps = 0;
    }

    /// Jumps straight to `time`, for caller-initiated seeks.
    pub fn seek(&mut self, time: f64) {
        self.smoothed = time;
    }

    /// Advances the clock by one frame and returns the smoothed music time.
    ///
    /// Between snaps the result never decreases, and it advances at most
    /// `1 + correction_gain * snap_threshold` times faster than real time.
    pub fn sample(&mut self, raw_audio_time: f64, frame_delta: f64) -> f64 {
        let frame_delta = if frame_delta.is_finite() {
            frame_delta.max(0.0)
        } else {
            0.0
        };

        if !raw_audio_time.is_finite() {
            self.smoothed += frame_delta;
            return self.smoothed;
        }

        let diff = raw_audio_time - self.smoothed;
        if diff.abs() > self.snap_threshold {
            tracing::debug!(
                from = self.smoothed,
                to = raw_audio_time,
                "music clock snapped to audio time"
            );
            self.smoothed = raw_audio_time;
            self.snaps += 1;
            return self.smoothed;
        }

        // Capped so a long frame cannot overshoot past the audio time.
        let pull = (self.correction_gain * frame_delta).min(1.0);
        let step = frame_delta + diff * pull;
        self.smoothed += step.max(0.0);
        self.smoothed
    }

    /// Like [`Self::sample`], deriving the frame delta from consecutive wall
    /// clock readings.
    pub fn observe(&mut self, sample: ClockSample) -> f64 {
        let frame_delta = self
            .last_wall_clock
            .map(|last| sample.wall_clock - last)
            .unwrap_or(0.0);
        self.last_wall_clock = Some(sample.wall_clock);
        self.sample(sample.audio_time, frame_delta)
    }
}
