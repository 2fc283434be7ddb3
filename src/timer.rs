use log::debug;
use std::time::Instant;

/// Measures one phase of a run and logs its progress at debug level.
pub struct Timer {
    name: String,
    start: Instant,
    last: Instant,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        let now = Instant::now();
        Self {
            name: name.to_string(),
            start: now,
            last: now,
        }
    }

    /// Logs the time since the previous call and the expected remaining time, for
    /// `iteration` in `0..=iteration_max`.
    pub fn iteration(&mut self, iteration: usize, iteration_max: usize) {
        let now = Instant::now();
        let since_last = now.duration_since(self.last).as_secs_f64();
        self.last = now;

        let done = iteration + 1;
        let elapsed = now.duration_since(self.start).as_secs_f64();
        let remaining = elapsed / done as f64 * (iteration_max + 1).saturating_sub(done) as f64;
        debug!(
            "{}: iteration {iteration}/{iteration_max}, {since_last:.3}s since last, {remaining:.3}s remaining",
            self.name
        );
    }

    /// Elapsed seconds since creation.
    pub fn finish(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        debug!("{}: done in {elapsed:.3}s", self.name);
        elapsed
    }
}
