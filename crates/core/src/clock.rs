//! Engine clock and frame-rate measurement.
//!
//! The clock is an explicit value owned by the application. Shader time is
//! derived from it and passed into `draw_frame`, so nothing in the engine
//! keeps its own static start time.

use std::time::{Duration, Instant};

/// Monotonic engine clock.
#[derive(Debug, Clone)]
pub struct EngineClock {
    start: Instant,
    last_tick: Instant,
}

impl EngineClock {
    /// Starts the clock now.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Starts the clock at an explicit instant.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            last_tick: start,
        }
    }

    /// Instant the engine started.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Time since engine start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Seconds since engine start, as fed to the shaders.
    pub fn time_seconds(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Returns the time since the previous tick and advances the tick mark.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        delta
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Averages frame times over a fixed reporting window.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
    fps: f32,
    frame_time_ms: f32,
}

impl FpsCounter {
    /// Creates a counter that refreshes its averages every `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
            fps: 0.0,
            frame_time_ms: 0.0,
        }
    }

    /// Records one frame. Returns `true` when the averages were refreshed.
    pub fn record(&mut self, frame_time: Duration) -> bool {
        self.accumulated += frame_time;
        self.frames += 1;

        if self.accumulated < self.window {
            return false;
        }

        let secs = self.accumulated.as_secs_f32();
        self.fps = self.frames as f32 / secs;
        self.frame_time_ms = secs * 1000.0 / self.frames as f32;
        self.accumulated = Duration::ZERO;
        self.frames = 0;
        true
    }

    /// Frames per second over the last completed window.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Mean frame time in milliseconds over the last completed window.
    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time_ms
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_given_instant() {
        let start = Instant::now();
        let clock = EngineClock::starting_at(start);
        assert_eq!(clock.start(), start);
        assert!(clock.time_seconds() >= 0.0);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let mut clock = EngineClock::new();
        let first = clock.tick();
        let second = clock.tick();
        assert!(first >= Duration::ZERO);
        assert!(second >= Duration::ZERO);
    }

    #[test]
    fn test_fps_counter_refreshes_after_window() {
        let mut counter = FpsCounter::new(Duration::from_millis(100));

        for _ in 0..9 {
            assert!(!counter.record(Duration::from_millis(10)));
        }
        assert!(counter.record(Duration::from_millis(10)));

        assert!((counter.fps() - 100.0).abs() < 0.5);
        assert!((counter.frame_time_ms() - 10.0).abs() < 0.05);
    }

    #[test]
    fn test_fps_counter_starts_at_zero() {
        let counter = FpsCounter::default();
        assert_eq!(counter.fps(), 0.0);
        assert_eq!(counter.frame_time_ms(), 0.0);
    }
}
