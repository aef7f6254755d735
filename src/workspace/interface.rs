//! # Interface: raw workspace models kept up to date from the helper.
//!
//! ```text
//! Triggers::leaf_changed ─────► refresh_workspace ─► workspace
//!                         ├───► refresh_remotes   ─► remotes
//!                         └───► refresh_env_vars  ─► env_vars, out_of_sync
//! Triggers::packages_changed ─► refresh_packages  ─► packages
//! ```
//!
//! Every refresh is one bridge request. A failed request leaves the
//! corresponding model untouched, except for the variables: any failure
//! there clears `env_vars`, and an out-of-sync profile raises `out_of_sync`.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bridge::{Bridge, BridgeCommand};
use crate::error::Error;
use crate::model::{ModelElement, Scope};
use crate::process::EnvVars;
use crate::promise::DelayedPromise;

use super::triggers::Triggers;

/// Toolchain folders reported by the helper's `info` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperInfo {
    /// User configuration folder.
    pub config_folder: PathBuf,
    /// Download cache folder (holds the remotes cache).
    pub cache_folder: PathBuf,
    /// Installed packages folder.
    pub package_folder: PathBuf,
}

/// Raw models fed by the bridge.
#[derive(Clone, Debug)]
pub struct Interface {
    bridge: Bridge,
    workspace: ModelElement<Option<Value>>,
    packages: ModelElement<Option<Value>>,
    remotes: ModelElement<Option<Value>>,
    env_vars: ModelElement<Option<EnvVars>>,
    out_of_sync: ModelElement<bool>,
}

impl Interface {
    /// Creates uninitialized models over `bridge`.
    pub fn new(bridge: Bridge, scope: &Scope) -> Self {
        Self {
            bridge,
            workspace: ModelElement::new("interface.workspace", scope),
            packages: ModelElement::new("interface.packages", scope),
            remotes: ModelElement::new("interface.remotes", scope),
            env_vars: ModelElement::new("interface.env_vars", scope),
            out_of_sync: ModelElement::new("interface.out_of_sync", scope),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Workspace state and profiles (`workspaceInfo`).
    pub fn workspace(&self) -> &ModelElement<Option<Value>> {
        &self.workspace
    }

    /// `{installedPackages, availablePackages}` (`packages`).
    pub fn packages(&self) -> &ModelElement<Option<Value>> {
        &self.packages
    }

    /// Configured remotes (`remotes`).
    pub fn remotes(&self) -> &ModelElement<Option<Value>> {
        &self.remotes
    }

    /// Variables of the current profile, `None` when they cannot be resolved.
    pub fn env_vars(&self) -> &ModelElement<Option<EnvVars>> {
        &self.env_vars
    }

    /// True when the current profile must be synced.
    pub fn out_of_sync(&self) -> &ModelElement<bool> {
        &self.out_of_sync
    }

    /// Refreshes the models whenever `triggers` fire, until `scope` is disposed.
    ///
    /// Triggers call on subscribe, so every model is requested once right away.
    pub fn bind(&self, triggers: &Triggers, scope: &Scope) {
        let this = self.clone();
        triggers.leaf_changed().add_listener(scope, move |_| {
            let _ = this.refresh_workspace();
            let _ = this.refresh_remotes();
            let _ = this.refresh_env_vars();
        });
        let this = self.clone();
        triggers.packages_changed().add_listener(scope, move |_| {
            let _ = this.refresh_packages();
        });
    }

    pub fn refresh_workspace(&self) -> DelayedPromise<bool> {
        self.refresh(&self.workspace, BridgeCommand::WorkspaceInfo)
    }

    pub fn refresh_remotes(&self) -> DelayedPromise<bool> {
        self.refresh(&self.remotes, BridgeCommand::Remotes)
    }

    pub fn refresh_packages(&self) -> DelayedPromise<bool> {
        self.refresh(&self.packages, BridgeCommand::Packages)
    }

    fn refresh(&self, model: &ModelElement<Option<Value>>, command: BridgeCommand) -> DelayedPromise<bool> {
        debug!(model = %model.name(), command = command.as_str(), "refresh requested");
        let request = self.bridge.send(command);
        model.set_future(async move { request.await })
    }

    /// Re-resolves the variables and the out-of-sync flag.
    pub fn refresh_env_vars(&self) -> DelayedPromise<bool> {
        let request = self.bridge.send(BridgeCommand::ResolveVariables);
        let out_of_sync = self.out_of_sync.clone();
        self.env_vars.set_future(async move {
            match request.await.and_then(|v| v.map(env_vars_from).transpose()) {
                Ok(vars) => {
                    out_of_sync.set(false);
                    Ok(vars)
                }
                Err(Error::ProfileOutOfSync) => {
                    warn!("current profile is out of sync");
                    out_of_sync.set(true);
                    Ok(None)
                }
                Err(e) => {
                    warn!(error = %e, "variables could not be resolved");
                    Ok(None)
                }
            }
        })
    }

    /// Asks the helper for its folders.
    pub async fn info(&self) -> Result<HelperInfo, Error> {
        let value = self
            .bridge
            .send(BridgeCommand::Info)
            .await?
            .ok_or_else(|| Error::failed("communication issue with the helper: empty info"))?;
        serde_json::from_value(value).map_err(|e| Error::failed(format!("unexpected info payload: {e}")))
    }

    /// Stops the helper.
    pub async fn dispose(&self) {
        self.bridge.dispose().await;
    }
}

/// Flattens a variables object; non-string values keep their JSON text.
fn env_vars_from(value: Value) -> Result<EnvVars, Error> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        other => Err(Error::failed(format!("unexpected variables payload: {other}"))),
    }
}
