use tracing::debug;

use super::{Operation, Scheduler};

/// Runs every operation as soon as it is submitted, with no ordering.
#[derive(Clone, Copy, Debug, Default)]
pub struct Immediate;

impl Immediate {
    /// Creates the scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for Immediate {
    fn submit(&self, op: Operation) {
        debug!(operation = op.id(), name = %op.name(), "executing operation immediately");
        // The outcome is observed through the operation's own promise.
        drop(op.start());
    }
}
