use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Error;
use crate::promise::WaitingPromise;

/// Global operation ordinal.
static OPERATION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Type-erased view of a `WaitingPromise<T>` as seen by schedulers.
trait Runnable: Send + Sync {
    /// Runs the executor and returns a future of its outcome, value discarded.
    fn start(&self) -> BoxFuture<'static, Result<(), Error>>;

    /// Rejects without running.
    fn cancel(&self, reason: Error);
}

impl<T> Runnable for WaitingPromise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn start(&self) -> BoxFuture<'static, Result<(), Error>> {
        let promise = self.execute();
        async move { promise.wait().await.map(|_| ()) }.boxed()
    }

    fn cancel(&self, reason: Error) {
        self.reject(reason);
    }
}

/// One scheduled unit of work: a waiting promise plus an ordinal id and label.
pub struct Operation {
    id: u64,
    name: Arc<str>,
    body: Box<dyn Runnable>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Operation {
    /// Wraps `promise` under `name` with the next ordinal id.
    pub fn new<T>(name: impl Into<Arc<str>>, promise: WaitingPromise<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            id: OPERATION_SEQ.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            body: Box::new(promise),
        }
    }

    /// Ordinal id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Label used in logs and events.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Executes the operation now; the future completes with its outcome.
    pub fn start(&self) -> BoxFuture<'static, Result<(), Error>> {
        self.body.start()
    }

    /// Rejects the operation's promise without running it.
    pub fn cancel(&self, reason: Error) {
        self.body.cancel(reason);
    }
}
