//! # Runtime configuration.
//!
//! Provides [`Config`] centralized settings for the bridge, the launcher and
//! the workspace manager.
//!
//! Config is used in three ways:
//! 1. **Bridge startup**: `Bridge::spawn(&config)` (program, args, env, cwd, timeouts)
//! 2. **Launcher defaults**: cwd and the workspace variable injected into operations
//! 3. **Manager wiring**: resource name, debounce delay, event bus capacity
//!
//! ## Sentinel values
//! - `request_timeout_ms = 0` → no per-request timeout
//! - `bus_capacity = 0` → clamped to 1
//! - `max_line_bytes = 0` → helper output lines are unbounded

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// Environment additions handed to the bridge helper.
const BRIDGE_ENV: [(&str, &str); 2] = [("LEAF_NON_INTERACTIVE", "1"), ("LEAF_DEBUG", "1")];

/// Global configuration for the leafvisor runtime.
///
/// ## Field semantics
/// - `bridge_program` / `bridge_args`: helper process spawned by the bridge
/// - `workspace`: workspace root sent with every request (`null` when absent)
/// - `resource_name`: name of the sequenced resource (prompts and logs)
/// - `workspace_env_var`: variable set to `workspace` for scheduled operations
/// - `request_timeout_ms`: liveness timeout per bridge request (`0` = none)
/// - `exit_grace_ms`: wait for the `exit` reply and child exit before killing
/// - `debounce_ms`: delay used to collapse watcher notification bursts
/// - `max_line_bytes`: longest helper output line accepted (`0` = unbounded)
/// - `bus_capacity`: event bus ring buffer size (min 1)
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the helper executable.
    pub bridge_program: PathBuf,

    /// Extra arguments for the helper executable.
    pub bridge_args: Vec<String>,

    /// Workspace root, if any.
    pub workspace: Option<PathBuf>,

    /// Name of the resource guarded by the sequencer.
    pub resource_name: String,

    /// Variable name injected into scheduled operations with the workspace root.
    pub workspace_env_var: String,

    /// Per-request timeout in milliseconds.
    ///
    /// A request without a response after this delay is rejected with
    /// [`Error::BridgeTimeout`]. `0` disables the timeout.
    pub request_timeout_ms: u64,

    /// Grace period in milliseconds granted to the helper on dispose.
    pub exit_grace_ms: u64,

    /// Debounce delay in milliseconds for watcher notifications.
    pub debounce_ms: u64,

    /// Longest line read from the helper; longer lines are dropped.
    pub max_line_bytes: usize,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl Config {
    /// Parses a configuration from TOML; missing keys keep their defaults.
    ///
    /// # Example
    /// ```
    /// use leafvisor::Config;
    ///
    /// let cfg = Config::from_toml_str("request_timeout_ms = 0\nresource_name = \"Toolchain\"").unwrap();
    /// assert!(cfg.request_timeout().is_none());
    /// assert_eq!(cfg.resource_name, "Toolchain");
    /// assert_eq!(cfg.debounce_ms, 100);
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self, Error> {
        toml::from_str(input).map_err(|e| Error::failed(format!("invalid configuration: {e}")))
    }

    /// Returns the per-request timeout as an `Option`.
    ///
    /// - `None` → requests wait until a response or teardown
    /// - `Some(d)` → requests are rejected after `d`
    #[inline]
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Returns the dispose grace period.
    #[inline]
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    /// Returns the watcher debounce delay.
    #[inline]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Returns the helper line limit, `usize::MAX` when unbounded.
    #[inline]
    pub fn max_line_length(&self) -> usize {
        match self.max_line_bytes {
            0 => usize::MAX,
            n => n,
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Variables added on top of the inherited environment for the helper.
    pub fn bridge_env(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        BRIDGE_ENV.into_iter()
    }

    /// Workspace root as the string sent on the wire.
    pub fn workspace_str(&self) -> Option<String> {
        self.workspace
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bridge_program = "leaf-bridge"` (resolved through `PATH`)
    /// - `resource_name = "Leaf"`, `workspace_env_var = "LEAF_WORKSPACE"`
    /// - `request_timeout_ms = 30000`, `exit_grace_ms = 2000`
    /// - `debounce_ms = 100`, `bus_capacity = 1024`
    /// - `max_line_bytes = 16 MiB`
    fn default() -> Self {
        Self {
            bridge_program: PathBuf::from("leaf-bridge"),
            bridge_args: Vec::new(),
            workspace: None,
            resource_name: "Leaf".to_string(),
            workspace_env_var: "LEAF_WORKSPACE".to_string(),
            request_timeout_ms: 30_000,
            exit_grace_ms: 2_000,
            debounce_ms: 100,
            bus_capacity: 1024,
            max_line_bytes: 16 * 1024 * 1024,
        }
    }
}
