//! # leafvisor
//!
//! **Leafvisor** is the asynchronous core of a toolchain workspace client:
//! deferred promises, reactive model elements, serialized scheduling of
//! external commands, and a JSON-lines multiplexer in front of a long-lived
//! helper process.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                 ┌───────────────────────────────────────────┐
//!  file changes ─►│ Triggers (debounced, call-on-subscribe)   │
//!                 └──────┬──────────────────────┬─────────────┘
//!                        ▼                      ▼
//!                 ┌─────────────────────────────────────────────┐
//!                 │ Interface                                   │
//!                 │  workspace / packages / remotes / env_vars  │
//!                 │  out_of_sync        (ModelElement<_>)       │
//!                 └──────┬──────────────────────▲───────────────┘
//!                        │ send(cmd)            │ set_future(promise)
//!                        ▼                      │
//!                 ┌─────────────────────────────┴───────────────┐
//!                 │ Bridge: id → DelayedPromise, JSON lines     │
//!                 │  stdin ──► helper process ──► stdout        │
//!                 └─────────────────────────────────────────────┘
//!
//!                 ┌─────────────────────────────────────────────┐
//!                 │ Manager                                     │
//!                 │  derived models (profiles, tags, ...)       │
//!                 │  commands ─► ProcessLauncher                │
//!                 └──────┬──────────────────────────────────────┘
//!                        ▼ WaitingPromise
//!                 ┌─────────────────────────────────────────────┐
//!                 │ PoliteSequencer (one at a time, asks when   │
//!                 │ busy, cancels the batch on failure)         │
//!                 └──────┬──────────────────────────────────────┘
//!                        ▼ publish(Event)
//!                 Bus ──► SubscriberSet ──► LogWriter / custom
//! ```
//!
//! ### Model element lifecycle
//! ```text
//! set*(v) ──► generation += 1, current = pending promise
//!   │
//!   └─ settle(gen, outcome)
//!        ├─ Err            ─► logged, nothing emitted
//!        ├─ gen superseded ─► dropped
//!        ├─ first value    ─► initial promise resolved, subscribers called once
//!        ├─ equal to last  ─► nothing emitted
//!        └─ otherwise      ─► listeners(new, old)
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                         |
//! |-------------------|----------------------------------------------------------|--------------------------------------------|
//! | **Promises**      | Externally settled results, deferred executions          | [`DelayedPromise`], [`WaitingPromise`]     |
//! | **Reactive model**| Scoped listeners, values with change notification        | [`Scope`], [`Listenable`], [`ModelElement`]|
//! | **Scheduling**    | Immediate, FIFO, and prompting FIFO execution            | [`Scheduler`], [`Sequencer`], [`Prompter`] |
//! | **Bridge**        | Request/response over a helper's stdio                   | [`Bridge`], [`BridgeCommand`]              |
//! | **Processes**     | External commands as scheduled operations                | [`ProcessLauncher`], [`EnvProvider`]       |
//! | **Workspace**     | Raw and derived workspace models, toolchain commands     | [`Interface`], [`Manager`], [`Triggers`]   |
//! | **Events**        | Runtime lifecycle events and their subscribers           | [`Event`], [`Bus`], [`Subscribe`]          |
//! | **Errors**        | One cloneable error type                                 | [`Error`]                                  |
//! | **Configuration** | Centralized runtime settings                             | [`Config`]                                 |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use leafvisor::{ModelElement, Scope};
//! use std::sync::{Arc, Mutex};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let scope = Scope::new();
//!     let model = ModelElement::<u32>::new("answer", &scope);
//!
//!     let seen = Arc::new(Mutex::new(Vec::new()));
//!     let log = Arc::clone(&seen);
//!     model.add_listener(&scope, move |new, old| log.lock().unwrap().push((*new, *old)));
//!
//!     model.set(1); // first value: subscribers called once with (1, 1)
//!     model.set(1); // equal: nothing
//!     model.set(2); // change
//!     assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (2, 1)]);
//!     assert_eq!(model.get().await, Ok(2));
//! }
//! ```
mod bridge;
mod config;
mod error;
mod events;
mod model;
mod process;
mod promise;
mod scheduler;
mod subscribers;
mod workspace;

// ---- Public re-exports ----

pub use bridge::{Bridge, BridgeCommand, BridgeResult, PROFILE_OUT_OF_SYNC, Request, Response, ResponseError};
pub use config::Config;
pub use error::Error;
pub use events::{Bus, Event, EventKind};
pub use model::{Disposable, Listenable, ListenerHandle, ModelElement, ModelValue, Scope};
pub use process::{EnvProvider, EnvVars, ProcessLauncher, WorkspaceEnv};
pub use promise::{DelayedPromise, WaitingPromise};
pub use scheduler::{
    AlwaysQueue, Decision, Immediate, Operation, Polite, PoliteSequencer, Prompter, Queuing, QueuingPolicy, Scheduler,
    SchedulerExt, Sequencer, busy_message,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use workspace::{Debouncer, EnvScope, HelperInfo, Interface, Manager, Tags, Triggers};

// Optional: expose the built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
