//! # Bridge: request/response multiplexer over the helper's stdio.
//!
//! ```text
//!  send(cmd) ──► pending[id] = promise ──► writer task ──► helper stdin
//!                                                            │
//!  promise ◄── on_line (match id) ◄── FramedRead<LinesCodec> ◄┘ helper stdout
//! ```
//!
//! ## Rules
//! - Ids come from a monotonic counter; many requests may be in flight and
//!   responses may arrive in any order.
//! - Each pending entry is removed exactly once: by its response, its timeout,
//!   EOF on the helper's stdout, or `dispose()`.
//! - A line that is not JSON, carries no id, or names an unknown id is logged
//!   and dropped; it never settles another request.
//! - `dispose()` sends `exit`, waits for the reply (bounded by the grace
//!   period), closes stdin, then waits for the child and kills it if needed.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{BridgeCommand, Request, Response};
use crate::config::Config;
use crate::error::Error;
use crate::events::{Bus, Event, EventKind};
use crate::promise::DelayedPromise;

/// Value a request resolves to: the helper's `result`, or `None`.
pub type BridgeResult = Option<Value>;

struct Inner {
    workspace: Option<String>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, DelayedPromise<BridgeResult>>>,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    token: CancellationToken,
    timeout: Option<Duration>,
    exit_grace: Duration,
    disposed: AtomicBool,
    child: tokio::sync::Mutex<Option<Child>>,
    bus: Option<Bus>,
}

/// Handle to one helper process. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("workspace", &self.inner.workspace)
            .field("pending", &self.pending_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Bridge {
    /// Spawns the helper described by `cfg` and connects to its stdio.
    ///
    /// The helper inherits the current environment plus the bridge additions
    /// and runs in the workspace root when one is configured.
    pub fn spawn(cfg: &Config, bus: Option<Bus>) -> Result<Self, Error> {
        let program = cfg.bridge_program.display().to_string();
        let mut cmd = Command::new(&cfg.bridge_program);
        cmd.args(&cfg.bridge_args)
            .envs(cfg.bridge_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ws) = &cfg.workspace {
            cmd.current_dir(ws);
        }

        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;
        let missing = |stream: &str| Error::BridgeIo {
            message: format!("helper {stream} not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "leafvisor::bridge::stderr", "{line}");
                }
            });
        }
        info!(program = %program, pid = ?child.id(), "bridge helper started");

        Ok(Self::start(stdout, stdin, cfg, bus, Some(child)))
    }

    /// Connects to an already running helper through its output and input streams.
    pub fn connect<R, W>(reader: R, writer: W, cfg: &Config, bus: Option<Bus>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(reader, writer, cfg, bus, None)
    }

    fn start<R, W>(reader: R, writer: W, cfg: &Config, bus: Option<Bus>, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            workspace: cfg.workspace_str(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            writer: Mutex::new(Some(tx)),
            token: CancellationToken::new(),
            timeout: cfg.request_timeout(),
            exit_grace: cfg.exit_grace(),
            disposed: AtomicBool::new(false),
            child: tokio::sync::Mutex::new(child),
            bus,
        });

        tokio::spawn(write_loop(writer, rx));
        tokio::spawn(read_loop(
            FramedRead::new(reader, LinesCodec::new_with_max_length(cfg.max_line_length())),
            Arc::downgrade(&inner),
            inner.token.clone(),
        ));
        Self { inner }
    }

    /// Sends `command` and returns a promise of the helper's result.
    pub fn send(&self, command: BridgeCommand) -> DelayedPromise<BridgeResult> {
        self.send_with_args(command, None)
    }

    /// Sends `command` with an `args` object.
    pub fn send_with_args(&self, command: BridgeCommand, args: Option<&Value>) -> DelayedPromise<BridgeResult> {
        if self.is_disposed() {
            return DelayedPromise::rejected(Error::BridgeClosed);
        }
        self.inner.request(command, args)
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// True once `dispose()` started.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Shuts the helper down. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let grace = self.inner.exit_grace;

        let exit = self.inner.request(BridgeCommand::Exit, None);
        if tokio::time::timeout(grace, exit.wait()).await.is_err() {
            warn!("bridge helper did not answer exit in time");
        }

        self.inner.writer.lock().take();
        self.inner.token.cancel();
        self.inner.close("disposed");

        let child = self.inner.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => info!(%status, "bridge helper exited"),
                Ok(Err(e)) => warn!(error = %e, "failed to wait for bridge helper"),
                Err(_) => {
                    warn!("bridge helper still running after grace period, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill bridge helper");
                    }
                }
            }
        }
    }
}

impl Inner {
    fn request(self: &Arc<Self>, command: BridgeCommand, args: Option<&Value>) -> DelayedPromise<BridgeResult> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            id,
            command,
            workspace: self.workspace.as_deref(),
            args,
        };
        let line = match request.to_line() {
            Ok(line) => line,
            Err(e) => return DelayedPromise::rejected(e),
        };

        let promise = DelayedPromise::new();
        self.pending.lock().insert(id, promise.clone());

        let sent = self
            .writer
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(line).is_ok());
        if !sent {
            self.pending.lock().remove(&id);
            promise.reject(Error::BridgeClosed);
            return promise;
        }

        debug!(id, command = command.as_str(), "bridge request sent");
        self.publish(Event::new(EventKind::RequestSent).with_request(id).with_name(command.as_str()));

        if let Some(timeout) = self.timeout {
            let weak = Arc::downgrade(self);
            let settled = promise.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.expire(id, timeout);
                        }
                    }
                    _ = settled.wait() => {}
                }
            });
        }
        promise
    }

    fn on_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let response = match Response::parse(line) {
            Ok(response) => response,
            Err(e) => {
                warn!(line, error = %e, "unparsable line from bridge helper dropped");
                self.publish(Event::new(EventKind::ResponseDropped).with_reason("not json"));
                return;
            }
        };
        let Some(id) = response.id else {
            warn!(line, "bridge response without id dropped");
            self.publish(Event::new(EventKind::ResponseDropped).with_reason("no id"));
            return;
        };
        let Some(promise) = self.pending.lock().remove(&id) else {
            warn!(id, "bridge response for unknown request dropped");
            self.publish(
                Event::new(EventKind::ResponseDropped)
                    .with_request(id)
                    .with_reason("unknown id"),
            );
            return;
        };

        let mut ev = Event::new(EventKind::ResponseReceived).with_request(id);
        if let Some(err) = &response.error {
            debug!(id, kind = %err.kind, message = %err.message, "bridge error response");
            ev = ev.with_reason(err.kind.as_str());
        } else {
            debug!(id, "bridge response received");
        }
        self.publish(ev);
        promise.settle(response.into_outcome());
    }

    fn expire(&self, id: u64, timeout: Duration) {
        let Some(promise) = self.pending.lock().remove(&id) else {
            return;
        };
        warn!(id, ?timeout, "bridge request timed out");
        self.publish(
            Event::new(EventKind::RequestTimedOut)
                .with_request(id)
                .with_timeout_ms(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        );
        promise.reject(Error::BridgeTimeout { id, timeout });
    }

    /// Rejects every pending request with `BridgeClosed`.
    fn close(&self, reason: &'static str) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            info!(count = pending.len(), reason, "rejecting pending bridge requests");
        }
        for (_, promise) in pending {
            promise.reject(Error::BridgeClosed);
        }
        self.publish(Event::new(EventKind::BridgeStopped).with_reason(reason));
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
        for (_, promise) in self.pending.get_mut().drain() {
            promise.reject(Error::BridgeClosed);
        }
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "failed to write to bridge helper");
            break;
        }
    }
    // Closing our end is the helper's signal to stop reading.
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(mut lines: FramedRead<R, LinesCodec>, inner: Weak<Inner>, token: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // The framed reader yields one `None` after a decode error, then resumes.
    let mut resuming = false;
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            next = lines.next() => next,
        };
        let Some(inner) = inner.upgrade() else { return };
        match next {
            Some(Ok(line)) => inner.on_line(&line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(limit = lines.decoder().max_length(), "oversized line from bridge helper dropped");
                resuming = true;
            }
            None if resuming => resuming = false,
            Some(Err(LinesCodecError::Io(e))) => {
                warn!(error = %e, "failed to read from bridge helper");
                inner.close("read error");
                return;
            }
            None => {
                info!("bridge helper closed its output");
                inner.close("eof");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, duplex};

    use super::*;

    /// Bridge wired to in-memory pipes; returns the helper's side.
    fn wired(cfg: &Config) -> (Bridge, BufReader<DuplexStream>, DuplexStream) {
        let (bridge_out, helper_in) = duplex(64 * 1024);
        let (helper_out, bridge_in) = duplex(64 * 1024);
        let bridge = Bridge::connect(bridge_in, bridge_out, cfg, None);
        (bridge, BufReader::new(helper_in), helper_out)
    }

    async fn read_request(input: &mut BufReader<DuplexStream>) -> Value {
        let mut line = String::new();
        input.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_responses_out_of_order_reach_their_callers() {
        let cfg = Config {
            workspace: Some("/ws".into()),
            ..Config::default()
        };
        let (bridge, mut input, mut output) = wired(&cfg);

        let packages = bridge.send(BridgeCommand::Packages);
        let remotes = bridge.send(BridgeCommand::Remotes);
        let first = read_request(&mut input).await;
        let second = read_request(&mut input).await;
        assert_eq!(first["command"], "packages");
        assert_eq!(first["workspace"], "/ws");
        assert_eq!(second["command"], "remotes");
        assert_ne!(first["id"], second["id"]);

        let reply = format!(
            "{}\n{}\n",
            json!({"id": second["id"], "result": {"kind": "remotes"}}),
            json!({"id": first["id"], "result": {"kind": "packages"}})
        );
        output.write_all(reply.as_bytes()).await.unwrap();

        assert_eq!(packages.await, Ok(Some(json!({"kind": "packages"}))));
        assert_eq!(remotes.await, Ok(Some(json!({"kind": "remotes"}))));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_sync_is_a_tagged_rejection() {
        let (bridge, mut input, mut output) = wired(&Config::default());

        let env = bridge.send(BridgeCommand::ResolveVariables);
        let other = bridge.send(BridgeCommand::ResolveVariables);
        let a = read_request(&mut input).await;
        let b = read_request(&mut input).await;
        let reply = format!(
            "{}\r\n{}\r\n",
            json!({"id": a["id"], "error": {"type": "ProfileOutOfSyncException", "message": "sync needed"}}),
            json!({"id": b["id"], "error": {"type": "ValueError", "message": "Missing workspace"}})
        );
        output.write_all(reply.as_bytes()).await.unwrap();

        assert_eq!(env.await, Err(Error::ProfileOutOfSync));
        assert_eq!(other.await, Ok(None));
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped_and_reading_goes_on() {
        let cfg = Config {
            max_line_bytes: 64,
            ..Config::default()
        };
        let (bridge, mut input, mut output) = wired(&cfg);

        let info = bridge.send(BridgeCommand::Info);
        let req = read_request(&mut input).await;
        let flood = format!("{}\n", "x".repeat(500));
        output.write_all(flood.as_bytes()).await.unwrap();
        let reply = format!("{}\n", json!({"id": req["id"], "result": 1}));
        output.write_all(reply.as_bytes()).await.unwrap();

        assert_eq!(info.await, Ok(Some(json!(1))));
        let later = bridge.send(BridgeCommand::Remotes);
        let req = read_request(&mut input).await;
        let reply = format!("{}\n", json!({"id": req["id"], "result": 2}));
        output.write_all(reply.as_bytes()).await.unwrap();
        assert_eq!(later.await, Ok(Some(json!(2))));
    }

    #[tokio::test]
    async fn test_garbage_and_strays_do_not_settle_anything() {
        let (bridge, mut input, mut output) = wired(&Config::default());

        let info = bridge.send(BridgeCommand::Info);
        let req = read_request(&mut input).await;
        let noise = format!(
            "Invalid leaf request: nope (boom)\n\n{}\n{}\n",
            json!({"id": 999, "result": 1}),
            json!({"result": 2})
        );
        output.write_all(noise.as_bytes()).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!info.is_settled());

        let reply = format!("{}\n", json!({"id": req["id"], "result": {"version": "2.0"}}));
        output.write_all(reply.as_bytes()).await.unwrap();
        assert_eq!(info.await, Ok(Some(json!({"version": "2.0"}))));
    }

    #[tokio::test]
    async fn test_eof_rejects_pending_requests() {
        let (bridge, _input, output) = wired(&Config::default());
        let pending = bridge.send(BridgeCommand::WorkspaceInfo);
        drop(output);
        assert_eq!(pending.await, Err(Error::BridgeClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_helper_times_out() {
        let cfg = Config {
            request_timeout_ms: 500,
            ..Config::default()
        };
        let (bridge, _input, _output) = wired(&cfg);
        let pending = bridge.send(BridgeCommand::Packages);
        assert!(matches!(
            pending.await,
            Err(Error::BridgeTimeout { timeout, .. }) if timeout == Duration::from_millis(500)
        ));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_sends_exit_then_closes() {
        let (bridge, mut input, mut output) = wired(&Config::default());
        let pending = bridge.send(BridgeCommand::Remotes);
        let _ = read_request(&mut input).await;

        let helper = tokio::spawn(async move {
            let exit = read_request(&mut input).await;
            assert_eq!(exit["command"], "exit");
            let reply = format!("{}\n", json!({"id": exit["id"], "error": {"type": "ValueError", "message": "Unknown command: exit"}}));
            output.write_all(reply.as_bytes()).await.unwrap();

            let mut rest = String::new();
            let n = input.read_line(&mut rest).await.unwrap();
            assert_eq!(n, 0, "stdin closed after exit");
        });

        bridge.dispose().await;
        helper.await.unwrap();
        assert_eq!(pending.await, Err(Error::BridgeClosed));
        assert_eq!(bridge.send(BridgeCommand::Info).await, Err(Error::BridgeClosed));
    }
}
