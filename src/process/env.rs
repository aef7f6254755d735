use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

/// Environment variables, ordered by name.
pub type EnvVars = BTreeMap<String, String>;

/// Supplies the environment of launched processes at execution time.
#[async_trait]
pub trait EnvProvider: Send + Sync + 'static {
    /// Environment to use, or `None` to cancel the execution.
    async fn env(&self) -> Option<EnvVars>;
}

/// Inherited process environment plus the workspace variable.
#[derive(Clone, Debug)]
pub struct WorkspaceEnv {
    var: String,
    workspace: Option<PathBuf>,
}

impl WorkspaceEnv {
    /// Exposes `workspace` under `var` (when a workspace is known).
    pub fn new(var: impl Into<String>, workspace: Option<PathBuf>) -> Self {
        Self {
            var: var.into(),
            workspace,
        }
    }
}

#[async_trait]
impl EnvProvider for WorkspaceEnv {
    async fn env(&self) -> Option<EnvVars> {
        let mut env: EnvVars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        if let Some(ws) = &self.workspace {
            env.insert(self.var.clone(), ws.to_string_lossy().into_owned());
        }
        Some(env)
    }
}

/// Fixed environment, mostly for tests and embedding.
#[async_trait]
impl EnvProvider for Option<EnvVars> {
    async fn env(&self) -> Option<EnvVars> {
        self.clone()
    }
}
