use log::{log_enabled, warn, Level};
use std::time::{Duration, Instant};

/// Scoped trace timer around one phase of the simulation step.
pub struct ScopedTimer<'a> {
    label: &'a str,
    start: Option<Instant>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(label: &'a str) -> Self {
        // Skip the clock read entirely when nobody listens.
        let start = log_enabled!(Level::Trace).then(Instant::now);
        Self { label, start }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.map(|start| start.elapsed()).unwrap_or_default()
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            log::trace!("{} took {} µs", self.label, start.elapsed().as_micros());
        }
    }
}

/// Warns when a fixed-step frame needed more sub-steps than it could afford.
pub fn warn_if_steps_dropped(dropped: u32, interval: f32) {
    if dropped > 0 {
        warn!(
            "physics fell behind, dropped {dropped} step(s) of {:.2} ms",
            interval * 1000.0
        );
    }
}
