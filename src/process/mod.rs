//! External processes as scheduled operations.
//!
//! ## Contents
//! - [`EnvVars`], [`EnvProvider`], [`WorkspaceEnv`] environment handed to processes
//! - [`ProcessLauncher`] `execute_process` / `execute_in_shell` over a [`Scheduler`](crate::Scheduler)

mod env;
mod launcher;

pub use env::{EnvProvider, EnvVars, WorkspaceEnv};
pub use launcher::ProcessLauncher;
