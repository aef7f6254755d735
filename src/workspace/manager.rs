//! # Manager: derived workspace models and mutating toolchain commands.
//!
//! Derived models never stay "unknown" once the raw model has a value:
//! missing objects become `{}`, a missing profile name becomes `None`.
//!
//! Mutating commands run the `leaf` CLI through a [`ProcessLauncher`] bound to
//! a [`PoliteSequencer`](crate::scheduler::PoliteSequencer): one command at a
//! time, and the user decides what happens to commands issued while busy.
//! The file changes they cause come back through [`Triggers`] and refresh
//! the models.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::Config;
use crate::error::Error;
use crate::events::Bus;
use crate::model::{ModelElement, Scope};
use crate::process::{EnvVars, ProcessLauncher, WorkspaceEnv};
use crate::promise::DelayedPromise;
use crate::scheduler::{Prompter, Sequencer};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::interface::{HelperInfo, Interface};
use super::triggers::Triggers;

const LEAF: &str = "leaf";

/// Tag → number of packages carrying it.
pub type Tags = BTreeMap<String, usize>;

/// Level at which an environment variable is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvScope {
    Package,
    Workspace,
    #[default]
    Profile,
    User,
}

impl EnvScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvScope::Package => "package",
            EnvScope::Workspace => "workspace",
            EnvScope::Profile => "profile",
            EnvScope::User => "user",
        }
    }
}

/// How a command reaches the system.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Process(Vec<String>),
    Shell(String),
}

/// Mutating commands and their command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeafCommand<'a> {
    Select(&'a str),
    SyncProfile,
    DeleteProfiles(&'a [&'a str]),
    CreateProfile {
        name: Option<&'a str>,
        packages: &'a [&'a str],
    },
    /// Adds packages to the current profile in one step.
    UpdateCurrent(&'a [&'a str]),
    /// Reconfigures another profile, then syncs it.
    ConfigureProfile {
        profile: &'a str,
        packages: &'a [&'a str],
        add: bool,
    },
    FetchRemotes,
    EnableRemote { id: &'a str, enabled: bool },
    AddRemote { alias: &'a str, url: &'a str },
    RemoveRemotes(&'a [&'a str]),
    SetEnv {
        var: &'a str,
        value: Option<&'a str>,
        scope: EnvScope,
    },
}

impl LeafCommand<'_> {
    fn title(&self) -> String {
        match self {
            LeafCommand::Select(profile) => format!("Switching to profile {profile}"),
            LeafCommand::SyncProfile => "Sync current profile".to_string(),
            LeafCommand::DeleteProfiles(profiles) => format!("Deleting profile {}", profiles.join(" ")),
            LeafCommand::CreateProfile { .. } => "Create new profile".to_string(),
            LeafCommand::UpdateCurrent(_) => "Update current profile".to_string(),
            LeafCommand::ConfigureProfile { profile, packages, add: true } => {
                format!("Add [{}] to profile {profile}", packages.join(" "))
            }
            LeafCommand::ConfigureProfile { profile, packages, add: false } => {
                format!("Remove [{}] from profile {profile}", packages.join(" "))
            }
            LeafCommand::FetchRemotes => "Fetch remotes".to_string(),
            LeafCommand::EnableRemote { id, enabled: true } => format!("Enable remote {id}"),
            LeafCommand::EnableRemote { id, enabled: false } => format!("Disable remote {id}"),
            LeafCommand::AddRemote { alias, url } => format!("Add remote {alias} ({url})"),
            LeafCommand::RemoveRemotes(aliases) => format!("Remove remote {}", aliases.join(" ")),
            LeafCommand::SetEnv { .. } => "Set Leaf env".to_string(),
        }
    }

    fn invocation(&self) -> Invocation {
        let args: Vec<String> = match self {
            LeafCommand::Select(profile) => vec!["select".into(), (*profile).into()],
            LeafCommand::SyncProfile => vec!["profile".into(), "sync".into()],
            LeafCommand::DeleteProfiles(profiles) => ["profile", "delete"]
                .into_iter()
                .chain(profiles.iter().copied())
                .map(String::from)
                .collect(),
            LeafCommand::CreateProfile { name, packages } => {
                let mut args = vec!["setup".to_string()];
                for id in *packages {
                    args.extend(["-p".to_string(), (*id).to_string()]);
                }
                args.extend(name.map(String::from));
                args
            }
            LeafCommand::UpdateCurrent(packages) => {
                let mut args = vec!["update".to_string()];
                args.extend(package_flags("--add-package", packages));
                args
            }
            LeafCommand::ConfigureProfile { profile, packages, add } => {
                let flag = if *add { "--add-package" } else { "--rm-package" };
                let flags = package_flags(flag, packages).join(" ");
                return Invocation::Shell(format!(
                    "{LEAF} profile config {flags} {profile} && {LEAF} profile sync {profile}"
                ));
            }
            LeafCommand::FetchRemotes => vec!["remote".into(), "fetch".into()],
            LeafCommand::EnableRemote { id, enabled } => {
                let verb = if *enabled { "enable" } else { "disable" };
                vec!["remote".into(), verb.into(), (*id).into()]
            }
            LeafCommand::AddRemote { alias, url } => ["remote", "add", "--insecure", *alias, *url]
                .into_iter()
                .map(String::from)
                .collect(),
            LeafCommand::RemoveRemotes(aliases) => ["remote", "remove"]
                .into_iter()
                .chain(aliases.iter().copied())
                .map(String::from)
                .collect(),
            LeafCommand::SetEnv { var, value, scope } => {
                let mut args = vec!["env".into(), scope.as_str().into()];
                // An empty value unsets, like a missing one.
                match value.filter(|v| !v.is_empty()) {
                    Some(value) => args.extend(["--set".into(), format!("{var}={value}")]),
                    None => args.extend(["--unset".into(), (*var).into()]),
                }
                args
            }
        };
        Invocation::Process(std::iter::once(LEAF.to_string()).chain(args).collect())
    }
}

fn package_flags(flag: &str, packages: &[&str]) -> Vec<String> {
    packages
        .iter()
        .flat_map(|id| [flag.to_string(), (*id).to_string()])
        .collect()
}

/// Workspace facade: derived models plus commands.
#[derive(Clone, Debug)]
pub struct Manager {
    interface: Interface,
    launcher: ProcessLauncher,
    triggers: Triggers,
    profiles: ModelElement<Value>,
    profile_name: ModelElement<Option<String>>,
    workspace_ready: ModelElement<bool>,
    remotes: ModelElement<Value>,
    env_vars: ModelElement<EnvVars>,
    packages: ModelElement<Value>,
    merged_packages: ModelElement<Value>,
    tags: ModelElement<Tags>,
}

impl Manager {
    /// Wires `interface` to `triggers` and derives the exposed models.
    pub fn new(interface: Interface, launcher: ProcessLauncher, triggers: Triggers, scope: &Scope) -> Self {
        let ws = interface.workspace();
        let profiles = ws.derive("manager.profiles", scope, |w| {
            w.as_ref()
                .and_then(|w| w.get("profiles"))
                .filter(|p| p.is_object())
                .cloned()
                .unwrap_or_else(|| json!({}))
        });
        let profile_name = ws.derive("manager.profile_name", scope, |w| current_profile(w.as_ref()));
        let workspace_ready = ws.derive("manager.workspace_ready", scope, |w| {
            w.as_ref()
                .and_then(|w| w.get("initialized"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        });
        let remotes = interface
            .remotes()
            .derive("manager.remotes", scope, |r| r.clone().unwrap_or_else(|| json!({})));
        let env_vars = interface
            .env_vars()
            .derive("manager.env_vars", scope, |e| e.clone().unwrap_or_default());
        let packages = interface
            .packages()
            .derive("manager.packages", scope, |p| mark_packages(p.as_ref()));
        let merged_packages = packages.derive("manager.packages.merged", scope, merge_packages);
        let tags = packages.derive("manager.tags", scope, count_tags);

        interface.bind(&triggers, scope);

        Self {
            interface,
            launcher,
            triggers,
            profiles,
            profile_name,
            workspace_ready,
            remotes,
            env_vars,
            packages,
            merged_packages,
            tags,
        }
    }

    /// Spawns the helper and wires the whole stack from `cfg`.
    ///
    /// Runtime events are fanned out to `subscribers` until `scope` is disposed.
    pub fn start(
        cfg: &Config,
        prompter: Arc<dyn Prompter>,
        subscribers: Vec<Arc<dyn Subscribe>>,
        scope: &Scope,
    ) -> Result<Self, Error> {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        forward_events(&bus, SubscriberSet::new(subscribers, Some(bus.clone())), scope);

        let bridge = Bridge::spawn(cfg, Some(bus.clone()))?;
        let interface = Interface::new(bridge, scope);
        let triggers = Triggers::new(cfg.debounce(), scope);

        let sequencer = Sequencer::polite(cfg.resource_name.clone(), prompter).with_bus(bus);
        let env = WorkspaceEnv::new(cfg.workspace_env_var.clone(), cfg.workspace.clone());
        let mut launcher =
            ProcessLauncher::new(cfg.resource_name.clone(), Arc::new(env)).with_scheduler(Arc::new(sequencer));
        if let Some(ws) = &cfg.workspace {
            launcher = launcher.with_default_cwd(ws);
        }

        info!(resource = %cfg.resource_name, workspace = ?cfg.workspace, "workspace manager started");
        Ok(Self::new(interface, launcher, triggers, scope))
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// File-change notifications driving the refreshes.
    pub fn triggers(&self) -> &Triggers {
        &self.triggers
    }

    /// Profiles object, `{}` when there is none.
    pub fn profiles(&self) -> &ModelElement<Value> {
        &self.profiles
    }

    /// Name of the profile flagged `current`.
    pub fn profile_name(&self) -> &ModelElement<Option<String>> {
        &self.profile_name
    }

    /// True when the workspace is initialized.
    pub fn workspace_ready(&self) -> &ModelElement<bool> {
        &self.workspace_ready
    }

    pub fn remotes(&self) -> &ModelElement<Value> {
        &self.remotes
    }

    pub fn env_vars(&self) -> &ModelElement<EnvVars> {
        &self.env_vars
    }

    /// Packages with an `installed` flag and merged custom tags.
    pub fn packages(&self) -> &ModelElement<Value> {
        &self.packages
    }

    /// Installed and available packages keyed by id; installed entries win
    /// and keep the tags of the available entry they replace.
    pub fn merged_packages(&self) -> &ModelElement<Value> {
        &self.merged_packages
    }

    pub fn tags(&self) -> &ModelElement<Tags> {
        &self.tags
    }

    pub fn out_of_sync(&self) -> &ModelElement<bool> {
        self.interface.out_of_sync()
    }

    pub async fn info(&self) -> Result<HelperInfo, Error> {
        self.interface.info().await
    }

    pub fn switch_profile(&self, profile: &str) -> DelayedPromise<()> {
        self.run(LeafCommand::Select(profile))
    }

    pub fn sync_current_profile(&self) -> DelayedPromise<()> {
        self.run(LeafCommand::SyncProfile)
    }

    /// Deletes `profiles`.
    pub fn delete_profiles(&self, profiles: &[&str]) -> DelayedPromise<()> {
        self.run(LeafCommand::DeleteProfiles(profiles))
    }

    /// Creates a profile holding `packages`; the toolchain names it when `name` is `None`.
    pub fn create_profile(&self, name: Option<&str>, packages: &[&str]) -> DelayedPromise<()> {
        self.run(LeafCommand::CreateProfile { name, packages })
    }

    /// Adds `packages` to `profile`.
    ///
    /// The current profile is updated in place; any other one is reconfigured
    /// and synced.
    pub async fn add_packages_to_profile(&self, profile: &str, packages: &[&str]) -> Result<(), Error> {
        if packages.is_empty() {
            return Err(Error::failed("no package to add"));
        }
        let command = self.package_command(profile, packages).await?;
        self.run(command).await
    }

    /// Removes `packages` from `profile`, then syncs it.
    pub fn remove_packages_from_profile(&self, profile: &str, packages: &[&str]) -> DelayedPromise<()> {
        if packages.is_empty() {
            return DelayedPromise::rejected(Error::failed("no package to remove"));
        }
        self.run(LeafCommand::ConfigureProfile {
            profile,
            packages,
            add: false,
        })
    }

    async fn package_command<'a>(&self, profile: &'a str, packages: &'a [&'a str]) -> Result<LeafCommand<'a>, Error> {
        let current = self.profile_name.get().await?;
        Ok(if current.as_deref() == Some(profile) {
            LeafCommand::UpdateCurrent(packages)
        } else {
            LeafCommand::ConfigureProfile {
                profile,
                packages,
                add: true,
            }
        })
    }

    pub fn fetch_remotes(&self) -> DelayedPromise<()> {
        self.run(LeafCommand::FetchRemotes)
    }

    /// Enables (or disables) a remote.
    pub fn enable_remote(&self, id: &str, enabled: bool) -> DelayedPromise<()> {
        self.run(LeafCommand::EnableRemote { id, enabled })
    }

    pub fn add_remote(&self, alias: &str, url: &str) -> DelayedPromise<()> {
        self.run(LeafCommand::AddRemote { alias, url })
    }

    pub fn remove_remotes(&self, aliases: &[&str]) -> DelayedPromise<()> {
        self.run(LeafCommand::RemoveRemotes(aliases))
    }

    /// Sets `var` at `scope`, or unsets it when `value` is `None` or empty.
    pub fn set_env_value(&self, var: &str, value: Option<&str>, scope: EnvScope) -> DelayedPromise<()> {
        self.run(LeafCommand::SetEnv { var, value, scope })
    }

    fn run(&self, command: LeafCommand<'_>) -> DelayedPromise<()> {
        let title = command.title();
        match command.invocation() {
            Invocation::Process(argv) => self.launcher.execute_process(&title, &argv, None),
            Invocation::Shell(cmdline) => self.launcher.execute_in_shell(&title, &cmdline, None),
        }
    }

    /// Stops the helper. Models keep their last values.
    pub async fn dispose(&self) {
        self.interface.dispose().await;
    }
}

/// Forwards bus events to `set` until `scope` is disposed.
fn forward_events(bus: &Bus, set: SubscriberSet, scope: &Scope) {
    if set.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
    scope.on_dispose(move || handle.abort());
}

fn current_profile(workspace: Option<&Value>) -> Option<String> {
    workspace?
        .get("profiles")?
        .as_object()?
        .iter()
        .find(|(_, p)| p.get("current").and_then(Value::as_bool).unwrap_or(false))
        .map(|(name, _)| name.clone())
}

/// Marks packages installed or available and folds `customTags` into `tags`.
fn mark_packages(all: Option<&Value>) -> Value {
    let mut out = all
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| json!({"installedPackages": {}, "availablePackages": {}}));
    for (key, installed) in [("installedPackages", true), ("availablePackages", false)] {
        let Some(packs) = out.get_mut(key).and_then(Value::as_object_mut) else {
            continue;
        };
        for pack in packs.values_mut() {
            if let Some(pack) = pack.as_object_mut() {
                pack.insert("installed".into(), Value::Bool(installed));
                if let Some(info) = pack.get_mut("info").and_then(Value::as_object_mut) {
                    merge_tags(info);
                }
            }
        }
    }
    out
}

fn merge_tags(info: &mut Map<String, Value>) {
    let mut tags: Vec<Value> = Vec::new();
    for key in ["tags", "customTags"] {
        for tag in info.get(key).and_then(Value::as_array).into_iter().flatten() {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    info.insert("tags".into(), Value::Array(tags));
}

/// Available packages overridden by installed ones with the same id.
fn merge_packages(packages: &Value) -> Value {
    let mut out = Map::new();
    if let Some(available) = packages.get("availablePackages").and_then(Value::as_object) {
        out.extend(available.iter().map(|(id, pack)| (id.clone(), pack.clone())));
    }
    if let Some(installed) = packages.get("installedPackages").and_then(Value::as_object) {
        for (id, pack) in installed {
            let mut pack = pack.clone();
            if let Some(replaced) = out.get(id) {
                inherit_tags(replaced, &mut pack);
            }
            out.insert(id.clone(), pack);
        }
    }
    Value::Object(out)
}

fn inherit_tags(from: &Value, to: &mut Value) {
    let Some(inherited) = from.pointer("/info/tags").and_then(Value::as_array) else {
        return;
    };
    let Some(info) = to.get_mut("info").and_then(Value::as_object_mut) else {
        return;
    };
    let tags = info.entry("tags").or_insert_with(|| Value::Array(Vec::new()));
    if let Some(tags) = tags.as_array_mut() {
        for tag in inherited {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
}

fn count_tags(packages: &Value) -> Tags {
    let mut out = Tags::new();
    for key in ["availablePackages", "installedPackages"] {
        let packs = packages.get(key).and_then(Value::as_object);
        for pack in packs.into_iter().flat_map(|m| m.values()) {
            let tags = pack.pointer("/info/tags").and_then(Value::as_array);
            for tag in tags.into_iter().flatten().filter_map(Value::as_str) {
                *out.entry(tag.to_string()).or_default() += 1;
            }
        }
    }
    out
}
