//! Wire format of the helper protocol (one JSON object per line).
//!
//! ```text
//! → {"id": 4, "command": "packages", "workspace": "/ws"}
//! → {"id": 5, "command": "resolveVariables", "workspace": "/ws", "args": {"keys": ["FOO"]}}
//! ← {"id": 4, "result": {...}}
//! ← {"id": 5, "error": {"type": "ProfileOutOfSyncException", "message": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Error `type` the helper uses when the current profile needs a sync.
pub const PROFILE_OUT_OF_SYNC: &str = "ProfileOutOfSyncException";

/// Commands understood by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeCommand {
    /// Toolchain version and folders.
    Info,
    /// Configured remotes.
    Remotes,
    /// Installed and available packages.
    Packages,
    /// Workspace state and profiles.
    WorkspaceInfo,
    /// Environment variables of the current profile.
    ResolveVariables,
    /// Ask the helper to shut down.
    Exit,
}

impl BridgeCommand {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeCommand::Info => "info",
            BridgeCommand::Remotes => "remotes",
            BridgeCommand::Packages => "packages",
            BridgeCommand::WorkspaceInfo => "workspaceInfo",
            BridgeCommand::ResolveVariables => "resolveVariables",
            BridgeCommand::Exit => "exit",
        }
    }
}

/// Outgoing request line.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    /// Correlation id.
    pub id: u64,
    /// Command to run.
    pub command: BridgeCommand,
    /// Workspace root, `null` when unknown.
    pub workspace: Option<&'a str>,
    /// Optional command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<&'a Value>,
}

impl Request<'_> {
    /// Serializes the request as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, Error> {
        let mut line = serde_json::to_string(self).map_err(|e| Error::BridgeIo {
            message: e.to_string(),
        })?;
        line.push('\n');
        Ok(line)
    }
}

/// Helper-side failure description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseError {
    /// Exception type name.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// Incoming response line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Correlation id; absent on helper-level failures.
    pub id: Option<u64>,
    /// Command result.
    pub result: Option<Value>,
    /// Command failure.
    pub error: Option<ResponseError>,
}

impl Response {
    /// Parses one line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Maps the response to what the caller sees.
    ///
    /// - `error` of type [`PROFILE_OUT_OF_SYNC`] → `Err(ProfileOutOfSync)`
    /// - any other `error` → `Ok(None)`
    /// - `result` absent or `null` → `Ok(None)`
    pub fn into_outcome(self) -> Result<Option<Value>, Error> {
        match self.error {
            Some(err) if err.kind == PROFILE_OUT_OF_SYNC => Err(Error::ProfileOutOfSync),
            Some(_) => Ok(None),
            None => Ok(self.result.filter(|v| !v.is_null())),
        }
    }
}
