//! # DelayedPromise: a result slot settled from the outside.
//!
//! A [`DelayedPromise`] is created pending and is later settled exactly once by
//! whoever holds a clone of it (`resolve`/`reject`/`settle`). Any number of
//! tasks can await it; each gets a clone of the outcome.
//!
//! ## Rules
//! - Settlement is **first wins**: every later `resolve`/`reject` is a no-op and
//!   returns `false`.
//! - Awaiting a settled promise completes immediately.
//! - Clones share the same slot and the same `id`.
//!
//! ```text
//! new() ──► Pending ──resolve(v)──► Resolved(v)
//!              │
//!              └──────reject(e)───► Rejected(e)
//! ```
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use leafvisor::DelayedPromise;
//!
//! let p = DelayedPromise::<u32>::new();
//! let waiter = p.clone();
//! let task = tokio::spawn(async move { waiter.await });
//!
//! assert!(p.resolve(7));
//! assert!(!p.resolve(8));
//! assert_eq!(task.await.unwrap(), Ok(7));
//! # }
//! ```

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::Error;

/// Global id generator for promises (debugging aid).
static PROMISE_SEQ: AtomicU64 = AtomicU64::new(1);

type Slot<T> = Option<Result<T, Error>>;

/// A promise that executes nothing but can be resolved or rejected at any time.
pub struct DelayedPromise<T> {
    id: u64,
    slot: Arc<watch::Sender<Slot<T>>>,
}

impl<T> Clone for DelayedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for DelayedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedPromise")
            .field("id", &self.id)
            .field("settled", &self.slot.borrow().is_some())
            .finish()
    }
}

impl<T> DelayedPromise<T> {
    /// Debug identifier, unique per process.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Default for DelayedPromise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayedPromise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a pending promise with the next id.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            id: PROMISE_SEQ.fetch_add(1, Ordering::Relaxed),
            slot: Arc::new(tx),
        }
    }

    /// Creates a promise already resolved with `value`.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let p = Self::new();
        p.resolve(value);
        p
    }

    /// Creates a promise already rejected with `reason`.
    #[must_use]
    pub fn rejected(reason: Error) -> Self {
        let p = Self::new();
        p.reject(reason);
        p
    }

    /// Resolves the promise. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the promise. Returns `false` if it was already settled.
    pub fn reject(&self, reason: Error) -> bool {
        self.settle(Err(reason))
    }

    /// Settles the promise with `outcome` unless it is already settled.
    pub fn settle(&self, outcome: Result<T, Error>) -> bool {
        let mut outcome = Some(outcome);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    /// True once resolved or rejected.
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Returns a clone of the outcome without waiting.
    pub fn peek(&self) -> Option<Result<T, Error>> {
        self.slot.borrow().clone()
    }

    /// Waits for the outcome.
    pub async fn wait(&self) -> Result<T, Error> {
        let mut rx = self.slot.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot
                .clone()
                .unwrap_or_else(|| Err(Error::failed("promise settled without outcome"))),
            Err(_) => Err(Error::failed("promise abandoned")),
        }
    }
}

impl<T> IntoFuture for DelayedPromise<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, Error>;
    type IntoFuture = BoxFuture<'static, Result<T, Error>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.wait().await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_shared_by_clones() {
        let a = DelayedPromise::<()>::new();
        let b = DelayedPromise::<()>::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_second_settlement_is_ignored() {
        let p = DelayedPromise::<u8>::new();
        assert!(p.reject(Error::BridgeClosed));
        assert!(!p.resolve(1));
        assert!(!p.reject(Error::NoEnv));
        assert_eq!(p.peek(), Some(Err(Error::BridgeClosed)));
    }

    #[tokio::test]
    async fn test_many_waiters_see_the_same_value() {
        let p = DelayedPromise::<String>::new();
        let w1 = tokio::spawn(p.clone().into_future());
        let w2 = tokio::spawn(p.clone().into_future());
        tokio::task::yield_now().await;

        p.resolve("done".into());
        assert_eq!(w1.await.unwrap(), Ok("done".to_string()));
        assert_eq!(w2.await.unwrap(), Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_settled_promise_completes_immediately() {
        let p = DelayedPromise::<()>::rejected(Error::ReturnCode { code: 3 });
        assert!(p.is_settled());
        assert_eq!(p.await, Err(Error::ReturnCode { code: 3 }));
    }
}
