//! # Runtime events emitted by schedulers, the bridge and subscriber workers.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Operation events**: sequencer flow (queued, started, finished, canceled)
//! - **Bridge events**: request/response traffic and helper lifecycle
//! - **Subscriber events**: fan-out problems (overflow, panic)
//!
//! The [`Event`] struct carries metadata such as timestamps, resource name,
//! operation id, request id and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use leafvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::OperationFailed)
//!     .with_resource("Leaf")
//!     .with_operation(3, "leaf profile sync")
//!     .with_reason("Return code: 2");
//!
//! assert_eq!(ev.kind, EventKind::OperationFailed);
//! assert_eq!(ev.resource.as_deref(), Some("Leaf"));
//! assert_eq!(ev.operation, Some(3));
//! assert_eq!(ev.reason.as_deref(), Some("Return code: 2"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `name`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `name`: subscriber name
    /// - `reason`: reason string ("full", "closed")
    SubscriberOverflow,

    // === Operation events ===
    /// Operation entered the waiting queue.
    ///
    /// Sets:
    /// - `resource`: sequenced resource
    /// - `operation`, `name`: operation id and label
    OperationQueued,

    /// Operation left the execution queue and started.
    ///
    /// Sets:
    /// - `resource`, `operation`, `name`
    OperationStarted,

    /// Operation finished successfully.
    ///
    /// Sets:
    /// - `resource`, `operation`, `name`
    OperationSucceeded,

    /// Operation failed; co-queued operations are canceled next.
    ///
    /// Sets:
    /// - `resource`, `operation`, `name`
    /// - `reason`: failure message
    OperationFailed,

    /// Operation was rejected before running (user choice or batch failure).
    ///
    /// Sets:
    /// - `resource`, `operation`, `name`
    /// - `reason`: cancellation message
    OperationCanceled,

    // === Bridge events ===
    /// Request written to the helper.
    ///
    /// Sets:
    /// - `request`: request id
    /// - `name`: command
    RequestSent,

    /// Response matched a pending request.
    ///
    /// Sets:
    /// - `request`: request id
    /// - `reason`: helper error type, when the response carried one
    ResponseReceived,

    /// Incoming line dropped (not JSON, no id, unknown id).
    ///
    /// Sets:
    /// - `request`: id, when one could be read
    /// - `reason`: why it was dropped
    ResponseDropped,

    /// Request rejected after the liveness timeout.
    ///
    /// Sets:
    /// - `request`: request id
    /// - `timeout_ms`: configured timeout
    RequestTimedOut,

    /// Helper stdout closed or bridge disposed; pending requests rejected.
    ///
    /// Sets:
    /// - `reason`: "eof" or "disposed"
    BridgeStopped,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Sequenced resource name.
    pub resource: Option<Arc<str>>,
    /// Operation id within its sequencer.
    pub operation: Option<u64>,
    /// Operation label, bridge command or subscriber name.
    pub name: Option<Arc<str>>,
    /// Bridge request id.
    pub request: Option<u64>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            resource: None,
            operation: None,
            name: None,
            request: None,
            timeout_ms: None,
            reason: None,
        }
    }

    /// Sets the resource name.
    #[inline]
    pub fn with_resource(mut self, resource: impl Into<Arc<str>>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the operation id and label.
    #[inline]
    pub fn with_operation(mut self, id: u64, name: impl Into<Arc<str>>) -> Self {
        self.operation = Some(id);
        self.name = Some(name.into());
        self
    }

    /// Sets the name (command, subscriber).
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the bridge request id.
    #[inline]
    pub fn with_request(mut self, id: u64) -> Self {
        self.request = Some(id);
        self
    }

    /// Sets the timeout.
    #[inline]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Sets the reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// True for operation lifecycle kinds.
    pub fn is_operation(&self) -> bool {
        matches!(
            self.kind,
            EventKind::OperationQueued
                | EventKind::OperationStarted
                | EventKind::OperationSucceeded
                | EventKind::OperationFailed
                | EventKind::OperationCanceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::RequestSent);
        let b = Event::new(EventKind::RequestSent);
        assert!(b.seq > a.seq, "seq must increase: {} then {}", a.seq, b.seq);
    }

    #[test]
    fn test_operation_classification() {
        assert!(Event::new(EventKind::OperationCanceled).is_operation());
        assert!(!Event::new(EventKind::BridgeStopped).is_operation());
    }
}
