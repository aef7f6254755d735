//! # ProcessLauncher: external commands as scheduled operations.
//!
//! Every command becomes a [`WaitingPromise`] submitted to the launcher's
//! [`Scheduler`]; nothing is spawned before the scheduler executes it.
//!
//! ## Outcome mapping
//! - exit code `0` → `Ok(())`
//! - exit code `N` → [`Error::ReturnCode`] (`"Return code: N"`)
//! - no exit code (signal) → [`Error::Killed`]
//! - spawn failure → [`Error::Spawn`]
//! - provider returned no environment → [`Error::NoEnv`]
//! - no cwd in the call nor in the launcher → [`Error::MissingCwd`] (not scheduled)
//!
//! stdout and stderr are logged line by line at `debug` under the launcher name.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::env::EnvProvider;
use crate::error::Error;
use crate::promise::{DelayedPromise, WaitingPromise};
use crate::scheduler::{Immediate, Scheduler, SchedulerExt};

#[cfg(unix)]
const SHELL: (&str, &str) = ("sh", "-c");
#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd", "/C");

/// What to run, resolved at submission time.
#[derive(Clone, Debug)]
struct CommandSpec {
    name: String,
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
}

impl CommandSpec {
    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs processes through a scheduler.
#[derive(Clone)]
pub struct ProcessLauncher {
    name: Arc<str>,
    scheduler: Arc<dyn Scheduler>,
    env: Arc<dyn EnvProvider>,
    default_cwd: Option<PathBuf>,
}

impl fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLauncher")
            .field("name", &self.name)
            .field("default_cwd", &self.default_cwd)
            .finish()
    }
}

impl ProcessLauncher {
    /// Creates a launcher that executes immediately (no sequencing).
    pub fn new(name: impl Into<Arc<str>>, env: Arc<dyn EnvProvider>) -> Self {
        Self {
            name: name.into(),
            scheduler: Arc::new(Immediate::new()),
            env,
            default_cwd: None,
        }
    }

    /// Routes every command through `scheduler`.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Working directory used when a call gives none.
    #[must_use]
    pub fn with_default_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(cwd.into());
        self
    }

    /// Launcher name (logs).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `argv[0]` with the remaining arguments.
    pub fn execute_process<S: AsRef<str>>(&self, name: &str, argv: &[S], cwd: Option<&Path>) -> DelayedPromise<()> {
        let Some((program, args)) = argv.split_first() else {
            return DelayedPromise::rejected(Error::failed(format!("empty command for '{name}'")));
        };
        let args = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.submit(name, program.as_ref().to_string(), args, cwd)
    }

    /// Runs `cmdline` through the platform shell.
    pub fn execute_in_shell(&self, name: &str, cmdline: &str, cwd: Option<&Path>) -> DelayedPromise<()> {
        let (shell, flag) = SHELL;
        self.submit(name, shell.to_string(), vec![flag.to_string(), cmdline.to_string()], cwd)
    }

    fn submit(&self, name: &str, program: String, args: Vec<String>, cwd: Option<&Path>) -> DelayedPromise<()> {
        let Some(cwd) = cwd.map(Path::to_path_buf).or_else(|| self.default_cwd.clone()) else {
            return DelayedPromise::rejected(Error::MissingCwd);
        };
        let spec = CommandSpec {
            name: name.to_string(),
            program,
            args,
            cwd,
        };
        let operation = WaitingPromise::from_future(run(Arc::clone(&self.name), Arc::clone(&self.env), spec));
        self.scheduler.schedule_named(name, operation)
    }
}

async fn run(launcher: Arc<str>, env: Arc<dyn EnvProvider>, spec: CommandSpec) -> Result<(), Error> {
    let env = env.env().await.ok_or(Error::NoEnv)?;
    info!(launcher = %launcher, operation = %spec.name, command = %spec.display(), cwd = %spec.cwd.display(), "executing command");

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;

    let mut loggers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        loggers.push(tokio::spawn(log_lines(Arc::clone(&launcher), out)));
    }
    if let Some(err) = child.stderr.take() {
        loggers.push(tokio::spawn(log_lines(Arc::clone(&launcher), err)));
    }

    let status = child.wait().await.map_err(|e| Error::failed(format!("failed to wait for '{}': {e}", spec.name)))?;
    for logger in loggers {
        let _ = logger.await;
    }

    match status.code() {
        Some(0) => {
            info!(launcher = %launcher, operation = %spec.name, "command succeeded");
            Ok(())
        }
        Some(code) => {
            warn!(launcher = %launcher, operation = %spec.name, code, "command failed");
            Err(Error::ReturnCode { code })
        }
        None => {
            warn!(launcher = %launcher, operation = %spec.name, "command terminated by signal");
            Err(Error::Killed { name: spec.name })
        }
    }
}

async fn log_lines<R>(launcher: Arc<str>, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(launcher = %launcher, "{line}");
    }
}
