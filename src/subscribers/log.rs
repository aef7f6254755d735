//! # LogWriter: renders runtime events through `tracing`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  leafvisor::subscribers::log: [queued] resource="Leaf" op=3 name="leaf profile sync"
//! INFO  leafvisor::subscribers::log: [started] resource="Leaf" op=3 name="leaf profile sync"
//! WARN  leafvisor::subscribers::log: [failed] resource="Leaf" op=3 err="Return code: 2"
//! WARN  leafvisor::subscribers::log: [canceled] resource="Leaf" op=4 err="operation canceled ..."
//! DEBUG leafvisor::subscribers::log: [request] id=7 command="packages"
//! WARN  leafvisor::subscribers::log: [bridge-stopped] reason="eof"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let resource = e.resource.as_deref().unwrap_or("-");
        let name = e.name.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::OperationQueued => {
                info!("[queued] resource={resource:?} op={:?} name={name:?}", e.operation);
            }
            EventKind::OperationStarted => {
                info!("[started] resource={resource:?} op={:?} name={name:?}", e.operation);
            }
            EventKind::OperationSucceeded => {
                info!("[succeeded] resource={resource:?} op={:?} name={name:?}", e.operation);
            }
            EventKind::OperationFailed => {
                warn!("[failed] resource={resource:?} op={:?} err={reason:?}", e.operation);
            }
            EventKind::OperationCanceled => {
                warn!("[canceled] resource={resource:?} op={:?} err={reason:?}", e.operation);
            }
            EventKind::RequestSent => {
                debug!("[request] id={:?} command={name:?}", e.request);
            }
            EventKind::ResponseReceived => {
                debug!("[response] id={:?} error_type={:?}", e.request, e.reason);
            }
            EventKind::ResponseDropped => {
                warn!("[response-dropped] id={:?} reason={reason:?}", e.request);
            }
            EventKind::RequestTimedOut => {
                warn!("[timeout] id={:?} timeout_ms={:?}", e.request, e.timeout_ms);
            }
            EventKind::BridgeStopped => {
                warn!("[bridge-stopped] reason={reason:?}");
            }
            EventKind::SubscriberOverflow => {
                warn!("[subscriber-overflow] subscriber={name:?} reason={reason:?}");
            }
            EventKind::SubscriberPanicked => {
                error!("[subscriber-panicked] subscriber={name} info={reason}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
