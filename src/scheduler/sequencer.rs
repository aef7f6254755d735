//! # Sequencer: FIFO, single-concurrency execution against one resource.
//!
//! ```text
//! submit(op) ──idle──────────────────────────► execution queue ──► running slot
//!     │                                            ▲
//!     └─busy──► waiting queue ──policy──┬─ Queue ──┘
//!                                       ├─ Wait   ──► (stay in waiting queue)
//!                                       └─ Forget ──► reject all waiting (CanceledByUser)
//!
//! running op fails ──► reject every waiting + queued op (CanceledByFailure), clear both
//! ```
//!
//! ## Rules
//! - At most one operation runs at a time (`running` slot).
//! - Operations run in the order they were committed to the execution queue.
//! - A failure of the running operation cancels the whole pending batch with
//!   one shared reason; nothing is retried.
//! - Busyness is sampled inside `submit`. An idle sequencer starts the
//!   operation right away without consulting the policy; a busy one parks it
//!   in the waiting queue and asks the policy on a spawned task.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::queuing::{AlwaysQueue, Queuing, QueuingPolicy};
use super::{Operation, Scheduler};
use crate::error::Error;
use crate::events::{Bus, Event, EventKind};

#[derive(Default)]
struct Queues {
    waiting: VecDeque<Operation>,
    execution: VecDeque<Operation>,
    running: Option<u64>,
}

struct Shared<Q> {
    resource: Arc<str>,
    policy: Q,
    queues: Mutex<Queues>,
    bus: Option<Bus>,
}

/// FIFO scheduler with a pluggable [`QueuingPolicy`].
pub struct Sequencer<Q = AlwaysQueue> {
    shared: Arc<Shared<Q>>,
}

impl<Q> Clone for Sequencer<Q> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Q> fmt::Debug for Sequencer<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.shared.queues.lock();
        f.debug_struct("Sequencer")
            .field("resource", &self.shared.resource)
            .field("waiting", &q.waiting.len())
            .field("queued", &q.execution.len())
            .field("running", &q.running)
            .finish()
    }
}

impl Sequencer<AlwaysQueue> {
    /// Creates a sequencer that queues everything.
    pub fn new(resource: impl Into<Arc<str>>) -> Self {
        Self::with_policy(resource, AlwaysQueue)
    }
}

impl<Q: QueuingPolicy> Sequencer<Q> {
    /// Creates a sequencer with a custom policy.
    pub fn with_policy(resource: impl Into<Arc<str>>, policy: Q) -> Self {
        Self {
            shared: Arc::new(Shared {
                resource: resource.into(),
                policy,
                queues: Mutex::new(Queues::default()),
                bus: None,
            }),
        }
    }

    /// Publishes operation lifecycle events on `bus`.
    ///
    /// Must be called before the sequencer is shared.
    #[must_use]
    pub fn with_bus(self, bus: Bus) -> Self {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                shared.bus = Some(bus);
                Self {
                    shared: Arc::new(shared),
                }
            }
            Err(shared) => {
                warn!(resource = %shared.resource, "sequencer already shared, bus not attached");
                Self { shared }
            }
        }
    }

    /// Name of the guarded resource.
    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    /// True while an operation is running or pending.
    pub fn is_busy(&self) -> bool {
        self.shared.queues.lock().is_busy()
    }

    /// Number of operations waiting for a decision and queued for execution.
    pub fn pending(&self) -> (usize, usize) {
        let q = self.shared.queues.lock();
        (q.waiting.len(), q.execution.len())
    }
}

impl<Q: QueuingPolicy> Scheduler for Sequencer<Q> {
    fn submit(&self, op: Operation) {
        self.shared.publish(EventKind::OperationQueued, &op, None);

        let busy = {
            let mut q = self.shared.queues.lock();
            let busy = q.is_busy();
            if busy {
                debug!(resource = %self.shared.resource, operation = op.id(), "operation added to waiting queue");
                q.waiting.push_back(op);
            } else {
                debug!(resource = %self.shared.resource, operation = op.id(), "operation added to execution queue");
                q.execution.push_back(op);
            }
            busy
        };
        if !busy {
            self.shared.run_next();
            return;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if shared.queues.lock().waiting.is_empty() {
                return;
            }
            let decision = shared.policy.queuing(&shared.resource, true).await;
            shared.apply(decision);
        });
    }
}

impl Queues {
    /// Busy while something runs, is committed, or awaits a decision.
    fn is_busy(&self) -> bool {
        self.running.is_some() || !self.execution.is_empty() || !self.waiting.is_empty()
    }
}

impl<Q: QueuingPolicy> Shared<Q> {
    fn apply(self: &Arc<Self>, decision: Queuing) {
        match decision {
            Queuing::Queue => {
                {
                    let mut q = self.queues.lock();
                    let waiting = std::mem::take(&mut q.waiting);
                    if !waiting.is_empty() {
                        debug!(
                            resource = %self.resource,
                            operations = ?waiting.iter().map(Operation::id).collect::<Vec<_>>(),
                            "operations added to execution queue"
                        );
                    }
                    q.execution.extend(waiting);
                }
                self.run_next();
            }
            Queuing::Forget => {
                let forgotten = std::mem::take(&mut self.queues.lock().waiting);
                if !forgotten.is_empty() {
                    info!(resource = %self.resource, count = forgotten.len(), "operations canceled by user");
                }
                let reason = Error::CanceledByUser {
                    resource: self.resource.to_string(),
                };
                self.cancel_all(forgotten, &reason);
            }
            Queuing::Wait => {}
        }
    }

    fn run_next(self: &Arc<Self>) {
        let op = {
            let mut q = self.queues.lock();
            if let Some(running) = q.running {
                if !q.execution.is_empty() {
                    debug!(
                        resource = %self.resource,
                        postponed = q.execution.len(),
                        running,
                        "operations postponed, another operation is running"
                    );
                }
                return;
            }
            let Some(op) = q.execution.pop_front() else {
                return;
            };
            q.running = Some(op.id());
            op
        };

        debug!(resource = %self.resource, operation = op.id(), name = %op.name(), "executing operation");
        self.publish(EventKind::OperationStarted, &op, None);
        let outcome = op.start();

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = outcome.await;
            shared.finish(op, outcome);
        });
    }

    fn finish(self: &Arc<Self>, op: Operation, outcome: Result<(), Error>) {
        let canceled = {
            let mut q = self.queues.lock();
            q.running = None;
            match &outcome {
                Ok(()) => Vec::new(),
                Err(_) => {
                    let mut all: Vec<Operation> = q.waiting.drain(..).collect();
                    all.extend(q.execution.drain(..));
                    all
                }
            }
        };

        match outcome {
            Ok(()) => self.publish(EventKind::OperationSucceeded, &op, None),
            Err(e) => {
                warn!(resource = %self.resource, operation = op.id(), error = %e, "operation failed");
                self.publish(EventKind::OperationFailed, &op, Some(e.to_string()));
                let reason = Error::CanceledByFailure {
                    resource: self.resource.to_string(),
                    cause: e.to_string(),
                };
                self.cancel_all(canceled, &reason);
            }
        }
        self.run_next();
    }

    fn cancel_all(&self, ops: impl IntoIterator<Item = Operation>, reason: &Error) {
        for op in ops {
            self.publish(EventKind::OperationCanceled, &op, Some(reason.to_string()));
            op.cancel(reason.clone());
        }
    }

    fn publish(&self, kind: EventKind, op: &Operation, reason: Option<String>) {
        let Some(bus) = &self.bus else { return };
        let mut ev = Event::new(kind)
            .with_resource(Arc::clone(&self.resource))
            .with_operation(op.id(), Arc::clone(op.name()));
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        bus.publish(ev);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::promise::{DelayedPromise, WaitingPromise};
    use crate::scheduler::SchedulerExt;

    fn timed(log: &Arc<Mutex<Vec<String>>>, i: usize, ms: u64) -> WaitingPromise<usize> {
        let log = Arc::clone(log);
        WaitingPromise::from_future(async move {
            log.lock().push(format!("Start P{i}"));
            tokio::time::sleep(Duration::from_millis(ms)).await;
            log.lock().push(format!("Stop P{i}"));
            Ok(i)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_regardless_of_duration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seq = Sequencer::new("Leaf");

        let promises: Vec<_> = [40_u64, 5, 25, 1]
            .into_iter()
            .enumerate()
            .map(|(i, ms)| seq.schedule(timed(&log, i, ms)))
            .collect();
        for (i, p) in promises.into_iter().enumerate() {
            assert_eq!(p.await, Ok(i));
        }

        let expected: Vec<String> = (0..4)
            .flat_map(|i| [format!("Start P{i}"), format!("Stop P{i}")])
            .collect();
        assert_eq!(*log.lock(), expected);
        assert!(!seq.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cancels_the_whole_batch() {
        let seq = Sequencer::new("Leaf");
        let failing = seq.schedule(WaitingPromise::from_future(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<(), _>(Error::ReturnCode { code: 1 })
        }));
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let second = seq.schedule(WaitingPromise::new(move |p: DelayedPromise<()>| {
            *flag.lock() = true;
            p.resolve(());
        }));
        let third = seq.schedule(WaitingPromise::from_future(async { Ok(3_u8) }));

        assert_eq!(failing.await, Err(Error::ReturnCode { code: 1 }));
        let expected = Error::CanceledByFailure {
            resource: "Leaf".into(),
            cause: "Return code: 1".into(),
        };
        assert_eq!(second.await, Err(expected.clone()));
        assert_eq!(third.await, Err(expected));
        assert!(!*ran.lock());
        assert_eq!(seq.pending(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_running_after_a_canceled_batch() {
        let seq = Sequencer::new("Leaf");
        let failing = seq.schedule(WaitingPromise::from_future(async {
            Err::<(), _>(Error::failed("broken"))
        }));
        assert!(failing.await.is_err());

        let next = seq.schedule(WaitingPromise::from_future(async { Ok("fine") }));
        assert_eq!(next.await, Ok("fine"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_events_are_published() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let seq = Sequencer::new("Leaf").with_bus(bus);

        let p = seq.schedule_named("sync", WaitingPromise::from_future(async { Ok(()) }));
        assert_eq!(p.await, Ok(()));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.name.as_deref(), Some("sync"));
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::OperationQueued,
                EventKind::OperationStarted,
                EventKind::OperationSucceeded
            ]
        );
    }
}
