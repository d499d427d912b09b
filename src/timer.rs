use std::time::{Duration, Instant};

/// Local mirror of the scale's timer; the scale itself never reports its timer value.
#[derive(Debug, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    /// Starts or resumes.
    pub fn start(&mut self) {
        self.started.get_or_insert_with(Instant::now);
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Zeroes the elapsed time. A running stopwatch keeps running.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map_or(Duration::ZERO, |started| started.elapsed())
    }
}
