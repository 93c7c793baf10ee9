//! Fractional progress reporting for long-running downloads.

/// Sink for progress updates: a fraction in `[0, 1]` plus a short
/// description. Sessions report 1.0 with "Success" or "Failed" as the
/// terminal update.
pub trait Progress {
    fn report(&mut self, fraction: f32, desc: &str);
}

/// Discards all updates.
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _fraction: f32, _desc: &str) {}
}

/// Adapts a closure to [Progress].
pub struct ProgressFn<F: FnMut(f32, &str)>(pub F);

impl<F: FnMut(f32, &str)> Progress for ProgressFn<F> {
    fn report(&mut self, fraction: f32, desc: &str) {
        (self.0)(fraction, desc)
    }
}
