//! Error type shared by promises, models, schedulers, the bridge and launchers.
//!
//! [`Error`] is `Clone + PartialEq`: a single rejection reason is handed to
//! every promise it affects (batch cancellation in the sequencer, teardown of
//! the bridge) and tests compare reasons by value.
//!
//! Every variant exposes a stable snake_case label through [`Error::as_label`]
//! for logs and event payloads.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the leafvisor runtime.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A model resolved to "no value" where one was required.
    #[error("missing value for model '{model}'")]
    MissingValue {
        /// Name of the model element.
        model: String,
    },

    /// The helper reported that the current profile is out of sync, so derived
    /// values (environment variables) cannot be computed until a sync runs.
    #[error("profile out of sync")]
    ProfileOutOfSync,

    /// The bridge was disposed or its helper process went away before answering.
    #[error("bridge closed")]
    BridgeClosed,

    /// No response arrived for a bridge request within the configured timeout.
    #[error("bridge request {id} timed out after {timeout:?}")]
    BridgeTimeout {
        /// Request id.
        id: u64,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Reading from or writing to the helper failed.
    #[error("bridge i/o error: {message}")]
    BridgeIo {
        /// Underlying error message.
        message: String,
    },

    /// A process could not be started.
    #[error("failed to spawn '{program}': {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error message.
        message: String,
    },

    /// A process exited with a non-zero code.
    #[error("Return code: {code}")]
    ReturnCode {
        /// Exit code.
        code: i32,
    },

    /// A process was terminated by a signal and has no exit code.
    #[error("process '{name}' was killed")]
    Killed {
        /// Operation name.
        name: String,
    },

    /// The environment provider had nothing to offer.
    #[error("no env available, execution canceled")]
    NoEnv,

    /// Neither the launcher nor the call site provided a working directory.
    #[error("cwd must be given at least once in launcher options or in method")]
    MissingCwd,

    /// The operator chose to forget the waiting operations.
    #[error("operation canceled by user ({resource})")]
    CanceledByUser {
        /// Name of the sequenced resource.
        resource: String,
    },

    /// The running operation failed and took the rest of the queue with it.
    #[error("operation canceled due to current operation error ({resource}): {cause}")]
    CanceledByFailure {
        /// Name of the sequenced resource.
        resource: String,
        /// Message of the error that failed the running operation.
        cause: String,
    },

    /// Generic failure raised by an operation or a value producer.
    #[error("{message}")]
    Failed {
        /// Failure message.
        message: String,
    },
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/events.
    ///
    /// # Example
    /// ```
    /// use leafvisor::Error;
    ///
    /// assert_eq!(Error::ReturnCode { code: 2 }.as_label(), "return_code");
    /// assert_eq!(Error::ProfileOutOfSync.as_label(), "profile_out_of_sync");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::MissingValue { .. } => "missing_value",
            Error::ProfileOutOfSync => "profile_out_of_sync",
            Error::BridgeClosed => "bridge_closed",
            Error::BridgeTimeout { .. } => "bridge_timeout",
            Error::BridgeIo { .. } => "bridge_io",
            Error::Spawn { .. } => "spawn_failed",
            Error::ReturnCode { .. } => "return_code",
            Error::Killed { .. } => "killed",
            Error::NoEnv => "no_env",
            Error::MissingCwd => "missing_cwd",
            Error::CanceledByUser { .. } => "canceled_by_user",
            Error::CanceledByFailure { .. } => "canceled_by_failure",
            Error::Failed { .. } => "failed",
        }
    }

    /// Shorthand for [`Error::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Error::Failed {
            message: message.into(),
        }
    }

    /// True for the two scheduler cancellation reasons.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Error::CanceledByUser { .. } | Error::CanceledByFailure { .. }
        )
    }
}
