use std::time::{Duration, Instant};

/// Default lower clamp for frame deltas.
pub const DEFAULT_MIN_DELTA: Duration = Duration::from_micros(100);
/// Default upper clamp for frame deltas; longer stalls count as this much time.
pub const DEFAULT_MAX_DELTA: Duration = Duration::from_millis(250);

/// Snapshot of the time state handed to the orchestrator each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Seconds since the previous sample.
    pub delta: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(delta: f32, frame_index: u64) -> Self {
        Self { delta, frame_index }
    }
}

/// Abstraction over where frame deltas originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock, with clamped deltas.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    last: Instant,
    frame: u64,
    min_delta: Duration,
    max_delta: Duration,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::with_clamps(DEFAULT_MIN_DELTA, DEFAULT_MAX_DELTA)
    }

    /// Swaps the bounds if they arrive inverted.
    pub fn with_clamps(min_delta: Duration, max_delta: Duration) -> Self {
        let (min_delta, max_delta) = if min_delta <= max_delta {
            (min_delta, max_delta)
        } else {
            (max_delta, min_delta)
        };
        Self {
            last: Instant::now(),
            frame: 0,
            min_delta,
            max_delta,
        }
    }

    fn clamp(&self, elapsed: Duration) -> Duration {
        elapsed.clamp(self.min_delta, self.max_delta)
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.last = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let now = Instant::now();
        let delta = self.clamp(now.saturating_duration_since(self.last));
        self.last = now;
        let sample = TimeSample::new(delta.as_secs_f32(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that advances by the same step every frame.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    step: f32,
    frame: u64,
}

impl FixedTimeSource {
    pub fn new(step: f32) -> Self {
        Self { step, frame: 0 }
    }

    pub fn step(&self) -> f32 {
        self.step
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.step, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_source_clamps_long_stalls() {
        let source = SystemTimeSource::new();
        assert_eq!(source.clamp(Duration::from_secs(5)), DEFAULT_MAX_DELTA);
        assert_eq!(source.clamp(Duration::ZERO), DEFAULT_MIN_DELTA);
    }

    #[test]
    fn system_source_counts_frames() {
        let mut source = SystemTimeSource::new();
        let first = source.sample();
        let second = source.sample();
        assert_eq!(first.frame_index, 0);
        assert_eq!(second.frame_index, 1);
        assert!(second.delta >= DEFAULT_MIN_DELTA.as_secs_f32());
        assert!(second.delta <= DEFAULT_MAX_DELTA.as_secs_f32());
    }

    #[test]
    fn inverted_clamps_are_swapped() {
        let source =
            SystemTimeSource::with_clamps(Duration::from_millis(50), Duration::from_millis(1));
        assert_eq!(source.clamp(Duration::from_secs(1)), Duration::from_millis(50));
    }

    #[test]
    fn fixed_source_repeats_step() {
        let mut source = FixedTimeSource::new(0.02);
        assert_eq!(source.sample(), TimeSample::new(0.02, 0));
        assert_eq!(source.sample(), TimeSample::new(0.02, 1));
        source.reset();
        assert_eq!(source.sample().frame_index, 0);
    }
}
