//! Smoothed frame rate.

use std::time::{Duration, Instant};

/// Exponentially smoothed frames-per-second estimate.
///
/// Frames are counted over windows of at least `interval`; at the end of
/// each window the measured rate is blended into the estimate with weight
/// `coeff`.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    fps: f64,
    interval: Duration,
    coeff: f64,
    count: u32,
    window_start: Option<Instant>,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(30.0, Duration::from_millis(500), 0.2)
    }
}

impl FpsMeter {
    /// `initial` is reported until the first window closes.
    pub fn new(initial: f64, interval: Duration, coeff: f64) -> Self {
        Self {
            fps: initial,
            interval,
            coeff: coeff.clamp(0.0, 1.0),
            count: 0,
            window_start: None,
        }
    }

    /// Records one frame now and returns the current estimate.
    pub fn update(&mut self) -> f64 {
        self.update_at(Instant::now())
    }

    /// Records one frame at `now`.
    ///
    /// The very first call only starts the clock.
    pub fn update_at(&mut self, now: Instant) -> f64 {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            self.count = 0;
            return self.fps;
        };

        self.count += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.interval && !elapsed.is_zero() {
            let measured = f64::from(self.count) / elapsed.as_secs_f64();
            self.fps = self.fps * (1.0 - self.coeff) + measured * self.coeff;
            self.window_start = Some(now);
            self.count = 0;
        }
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}
