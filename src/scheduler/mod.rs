//! Scheduler family: when (and whether) a submitted operation executes.
//!
//! ## Contents
//! - [`Scheduler`] object-safe submission trait, [`SchedulerExt::schedule`] typed entry point
//! - [`Operation`] type-erased `WaitingPromise` with an ordinal id
//! - [`Immediate`] runs on submission, no ordering
//! - [`Sequencer`] FIFO, one at a time, batch cancellation on failure
//! - [`PoliteSequencer`] sequencer that asks a [`Prompter`] when busy
//! - [`Queuing`], [`QueuingPolicy`] waiting-queue decisions
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use leafvisor::{SchedulerExt, Sequencer, WaitingPromise};
//!
//! let seq = Sequencer::new("Leaf");
//! let a = seq.schedule(WaitingPromise::from_future(async { Ok(1) }));
//! let b = seq.schedule(WaitingPromise::from_future(async { Ok(2) }));
//! assert_eq!(a.await, Ok(1));
//! assert_eq!(b.await, Ok(2));
//! # }
//! ```

mod immediate;
mod operation;
mod polite;
mod queuing;
mod sequencer;

pub use immediate::Immediate;
pub use operation::Operation;
pub use polite::{Decision, Polite, PoliteSequencer, Prompter, busy_message};
pub use queuing::{AlwaysQueue, Queuing, QueuingPolicy};
pub use sequencer::Sequencer;

use std::sync::Arc;

use crate::promise::{DelayedPromise, WaitingPromise};

/// Accepts operations and decides when they execute.
pub trait Scheduler: Send + Sync {
    /// Takes ownership of `op`; its outcome is observed through its promise.
    fn submit(&self, op: Operation);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn submit(&self, op: Operation) {
        (**self).submit(op);
    }
}

/// Typed submission helpers, available on every scheduler (including `dyn Scheduler`).
pub trait SchedulerExt: Scheduler {
    /// Submits `operation` and returns its promise.
    fn schedule<T>(&self, operation: WaitingPromise<T>) -> DelayedPromise<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.schedule_named("operation", operation)
    }

    /// Same as [`schedule`](Self::schedule) with a label for logs and events.
    fn schedule_named<T>(&self, name: &str, operation: WaitingPromise<T>) -> DelayedPromise<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let promise = operation.promise();
        self.submit(Operation::new(name, operation));
        promise
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}
