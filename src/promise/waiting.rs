//! # WaitingPromise: a promise whose body runs only when triggered.
//!
//! A [`WaitingPromise`] is *armed* on creation: its executor is stored but not
//! run. [`WaitingPromise::execute`] runs the executor once with the underlying
//! [`DelayedPromise`] and moves it to *pending*.
//!
//! ```text
//! new(executor) ──► Armed ──execute()──► Pending ──settle──► Settled
//!                     │
//!                     └──reject(e) (scheduler cancel)──────► Rejected(e)
//! ```
//!
//! `execute()` is idempotent: a second call logs a warning and returns the
//! same promise without re-running the executor, so a process is never
//! spawned twice for one operation.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::DelayedPromise;
use crate::error::Error;

type Executor<T> = Box<dyn FnOnce(DelayedPromise<T>) + Send + 'static>;

/// A promise whose executor is deferred until [`execute`](Self::execute).
pub struct WaitingPromise<T> {
    promise: DelayedPromise<T>,
    executor: Arc<Mutex<Option<Executor<T>>>>,
}

impl<T> Clone for WaitingPromise<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<T> fmt::Debug for WaitingPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingPromise")
            .field("id", &self.promise.id())
            .field("armed", &self.executor.lock().is_some())
            .finish()
    }
}

impl<T> WaitingPromise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Stores `executor` without running it.
    ///
    /// The executor receives the promise to settle; it may settle it
    /// synchronously or hand it to a spawned task.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(DelayedPromise<T>) + Send + 'static,
    {
        Self {
            promise: DelayedPromise::new(),
            executor: Arc::new(Mutex::new(Some(Box::new(executor)))),
        }
    }

    /// Defers a future: on `execute()` it is spawned on the current runtime and
    /// its output settles the promise.
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self::new(move |promise| {
            tokio::spawn(async move {
                promise.settle(fut.await);
            });
        })
    }

    /// Runs the executor (first call only) and returns the promise.
    pub fn execute(&self) -> DelayedPromise<T> {
        let executor = self.executor.lock().take();
        match executor {
            Some(run) => run(self.promise.clone()),
            None => warn!(promise = self.promise.id(), "execute() called twice, ignored"),
        }
        self.promise.clone()
    }

    /// True until `execute()` runs.
    pub fn is_armed(&self) -> bool {
        self.executor.lock().is_some()
    }

    /// The promise settled by the executor.
    pub fn promise(&self) -> DelayedPromise<T> {
        self.promise.clone()
    }

    /// Rejects the promise; an armed executor is dropped without running.
    pub fn reject(&self, reason: Error) -> bool {
        self.executor.lock().take();
        self.promise.reject(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_executor_waits_for_execute() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let wp = WaitingPromise::new(move |p: DelayedPromise<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            p.resolve(42);
        });

        assert!(wp.is_armed());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!wp.promise().is_settled());

        let p = wp.execute();
        assert_eq!(p.peek(), Some(Ok(42)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_is_idempotent() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let wp = WaitingPromise::new(move |p: DelayedPromise<()>| {
            counter.fetch_add(1, Ordering::SeqCst);
            p.resolve(());
        });

        let first = wp.execute();
        let second = wp.execute();
        assert_eq!(first.id(), second.id());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejecting_an_armed_promise_drops_the_executor() {
        let wp = WaitingPromise::new(|p: DelayedPromise<()>| {
            p.resolve(());
        });
        assert!(wp.reject(Error::CanceledByUser {
            resource: "Leaf".into()
        }));
        assert!(!wp.is_armed());

        let p = wp.execute();
        assert!(matches!(p.peek(), Some(Err(Error::CanceledByUser { .. }))));
    }

    #[test]
    fn test_debug_needs_no_bounds_on_the_value() {
        fn debuggable<D: fmt::Debug>() {}
        struct Opaque;
        debuggable::<WaitingPromise<Opaque>>();
        debuggable::<DelayedPromise<Opaque>>();

        let wp = WaitingPromise::new(|p: DelayedPromise<u8>| {
            p.resolve(1);
        });
        let id = wp.promise().id();
        assert_eq!(format!("{wp:?}"), format!("WaitingPromise {{ id: {id}, armed: true }}"));
    }

    #[tokio::test]
    async fn test_deferred_future_runs_on_execute() {
        let wp = WaitingPromise::from_future(async { Ok::<_, Error>(5_u8) });
        assert_eq!(wp.execute().await, Ok(5));
    }
}
