//! # Queuing policy for sequencers
//!
//! A [`Sequencer`](super::Sequencer) serializes operations against one
//! resource. A submission to an idle resource runs at once; one arriving
//! while the resource is busy lands in a **waiting queue**, and the policy
//! then decides what happens to the whole waiting queue.
//!
//! ## Variants
//! - `Queue`: move every waiting operation (arrival order) to the execution queue.
//! - `Wait`: leave the waiting queue alone; a pending decision will handle it.
//! - `Forget`: reject every waiting operation with "canceled by user".
//!
//! ## Invariants
//! - Operations of one sequencer never run in parallel.
//! - Queued operations run strictly in submission order.
//! - A decision applies to the waiting queue **as a whole**, never to one entry.

use async_trait::async_trait;

/// Decision taken for the waiting queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Queuing {
    /// Commit all waiting operations to the execution queue.
    Queue,

    /// Do nothing now; another decision is pending.
    Wait,

    /// Reject and clear the waiting queue.
    Forget,
}

/// Policy consulted for submissions to a busy resource.
#[async_trait]
pub trait QueuingPolicy: Send + Sync + 'static {
    /// Decides what to do with the waiting queue of `resource`.
    ///
    /// `busy` is the resource state sampled when the operation was submitted.
    async fn queuing(&self, resource: &str, busy: bool) -> Queuing;
}

/// Default policy: always [`Queuing::Queue`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysQueue;

#[async_trait]
impl QueuingPolicy for AlwaysQueue {
    async fn queuing(&self, _resource: &str, _busy: bool) -> Queuing {
        Queuing::Queue
    }
}
