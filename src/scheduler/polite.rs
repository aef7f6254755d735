//! # PoliteSequencer: ask before queuing behind a running operation.
//!
//! When nothing is running, submissions are queued right away. When an
//! operation is running, the operator is asked (through a [`Prompter`]) whether
//! to queue the new work or forget it.
//!
//! ## Rules
//! - At most one prompt is open per sequencer; submissions arriving while it is
//!   open get [`Queuing::Wait`] and are decided together with the open prompt.
//! - The answer applies to the whole waiting queue.
//! - Only an explicit "queue" answer queues; anything else (including a
//!   dismissed prompt) forgets.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::queuing::{Queuing, QueuingPolicy};
use super::sequencer::Sequencer;

/// Operator answer to a busy-resource prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Add the new operations to the execution queue.
    Queue,
    /// Drop the new operations.
    Forget,
}

impl Decision {
    /// Maps a free-form answer; only `"queue"` (any case) queues.
    pub fn from_answer(answer: Option<&str>) -> Self {
        match answer {
            Some(a) if a.trim().eq_ignore_ascii_case("queue") => Decision::Queue,
            _ => Decision::Forget,
        }
    }
}

/// Asks the operator what to do with operations submitted to a busy resource.
#[async_trait]
pub trait Prompter: Send + Sync + 'static {
    /// Shows the question for `resource` and waits for the answer.
    async fn ask(&self, resource: &str) -> Decision;
}

/// Text shown by interactive prompters.
pub fn busy_message(resource: &str) -> String {
    format!(
        "{resource} is already busy. Do you want to queue this new operation for later execution, or simply forget it?"
    )
}

/// Policy that prompts when the resource is busy.
pub struct Polite {
    prompter: Arc<dyn Prompter>,
    prompt_open: AtomicBool,
}

impl fmt::Debug for Polite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Polite")
            .field("prompt_open", &self.prompt_open.load(Ordering::Relaxed))
            .finish()
    }
}

impl Polite {
    /// Creates the policy around `prompter`.
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            prompter,
            prompt_open: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl QueuingPolicy for Polite {
    async fn queuing(&self, resource: &str, busy: bool) -> Queuing {
        if !busy {
            return Queuing::Queue;
        }
        if self.prompt_open.swap(true, Ordering::AcqRel) {
            debug!(resource, "prompt already open, operation waits for its answer");
            return Queuing::Wait;
        }
        let decision = self.prompter.ask(resource).await;
        self.prompt_open.store(false, Ordering::Release);
        debug!(resource, ?decision, "operator answered");
        match decision {
            Decision::Queue => Queuing::Queue,
            Decision::Forget => Queuing::Forget,
        }
    }
}

/// Sequencer that asks the operator before queuing behind a running operation.
pub type PoliteSequencer = Sequencer<Polite>;

impl Sequencer<Polite> {
    /// Creates a polite sequencer for `resource`.
    pub fn polite(resource: impl Into<Arc<str>>, prompter: Arc<dyn Prompter>) -> Self {
        Sequencer::with_policy(resource, Polite::new(prompter))
    }
}
