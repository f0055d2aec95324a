//! Subprocess transport over stdin/stdout.
//!
//! Spawns an MCP server as a child process and exchanges newline-delimited
//! JSON with it. The child starts with a cleared environment containing only
//! [`DEFAULT_INHERITED_ENV_VARS`] and whatever the caller adds.
//!
//! ```no_run
//! use mcpwire_transport::{StderrMode, StdioTransport, Transport};
//!
//! # async fn example() -> Result<(), mcpwire_transport::TransportError> {
//! let transport = StdioTransport::builder("my-mcp-server")
//!     .arg("--verbose")
//!     .env("MCP_LOG_LEVEL", "debug")
//!     .current_dir("/path/to/server")
//!     .stderr(StderrMode::Inherit)
//!     .build();
//! transport.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Shutdown
//!
//! `close` drops the child's stdin, sends `SIGTERM` on Unix and waits for the
//! grace period. A child still running after that is killed.

use crate::codec::{DEFAULT_MAX_LINE_LENGTH, JsonLineCodec};
use crate::error::TransportError;
use crate::observers::Observers;
use crate::runtime::{AsyncMutex, TaskSet, lock};
use crate::traits::{Transport, TransportMetadata};
use bytes::BytesMut;
use mcpwire_core::Payload;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

/// Environment variables copied from the parent into the child.
#[cfg(unix)]
pub const DEFAULT_INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// Environment variables copied from the parent into the child.
#[cfg(windows)]
pub const DEFAULT_INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
    "PROGRAMFILES",
];

/// Environment variables copied from the parent into the child.
#[cfg(not(any(unix, windows)))]
pub const DEFAULT_INHERITED_ENV_VARS: &[&str] = &["PATH"];

/// Default time a child gets to exit after `SIGTERM`.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// The subset of the current environment a child inherits by default.
///
/// Values beginning with `()` are exported shell functions and are skipped.
#[must_use]
pub fn default_environment() -> HashMap<String, String> {
    DEFAULT_INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            let value = std::env::var(key).ok()?;
            if value.starts_with("()") {
                return None;
            }
            Some(((*key).to_string(), value))
        })
        .collect()
}

/// Where the child's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    /// Share the parent's stderr.
    Inherit,
    /// Forward each line to `tracing` at info level.
    #[default]
    Log,
    /// Drop it.
    Discard,
}

/// Lifecycle of a [`StdioTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioState {
    /// Not yet started.
    Unstarted,
    /// Child spawned.
    Started,
    /// Closed. Terminal.
    Closed,
}

#[derive(Debug, Clone)]
struct StdioConfig {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    current_dir: Option<PathBuf>,
    stderr: StderrMode,
    close_grace: Duration,
    max_line_length: usize,
}

/// Builder for [`StdioTransport`].
#[derive(Debug, Clone)]
pub struct StdioTransportBuilder {
    config: StdioConfig,
}

impl StdioTransportBuilder {
    /// Start building a transport for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            config: StdioConfig {
                program: program.into(),
                args: Vec::new(),
                env: HashMap::new(),
                current_dir: None,
                stderr: StderrMode::default(),
                close_grace: DEFAULT_CLOSE_GRACE,
                max_line_length: DEFAULT_MAX_LINE_LENGTH,
            },
        }
    }

    /// Add an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    /// Add several arguments.
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable, overriding an inherited one.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the child's working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.current_dir = Some(dir.into());
        self
    }

    /// Choose where stderr goes.
    #[must_use]
    pub const fn stderr(mut self, mode: StderrMode) -> Self {
        self.config.stderr = mode;
        self
    }

    /// How long `close` waits after `SIGTERM` before killing.
    #[must_use]
    pub const fn close_grace(mut self, grace: Duration) -> Self {
        self.config.close_grace = grace;
        self
    }

    /// Largest accepted line from the child.
    #[must_use]
    pub const fn max_line_length(mut self, max: usize) -> Self {
        self.config.max_line_length = max;
        self
    }

    /// Build the transport. Nothing is spawned until `start`.
    #[must_use]
    pub fn build(self) -> StdioTransport {
        StdioTransport {
            inner: Arc::new(StdioInner {
                config: self.config,
                stdin: AsyncMutex::new(None),
                pid: Mutex::new(None),
                state: Mutex::new(StdioState::Unstarted),
                connected_at: Mutex::new(None),
                tasks: TaskSet::new(),
                observers: Observers::new(),
                exited: CancellationToken::new(),
                reader_done: CancellationToken::new(),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
            }),
        }
    }
}

/// A transport connected to a child process over stdio.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

#[derive(Debug)]
struct StdioInner {
    config: StdioConfig,
    stdin: AsyncMutex<Option<ChildStdin>>,
    pid: Mutex<Option<u32>>,
    state: Mutex<StdioState>,
    connected_at: Mutex<Option<Instant>>,
    tasks: TaskSet,
    observers: Observers,
    exited: CancellationToken,
    reader_done: CancellationToken,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl StdioTransport {
    /// Create a builder.
    #[must_use]
    pub fn builder(program: impl Into<String>) -> StdioTransportBuilder {
        StdioTransportBuilder::new(program)
    }

    /// Process id of the child while it is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.inner.pid)
    }

    /// The program this transport runs.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.inner.config.program
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StdioState {
        *lock(&self.inner.state)
    }

    /// Whether the child has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.inner.exited.is_cancelled()
    }

    /// Payloads written to the child.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    /// Payloads read from the child.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }

    fn spawn_child(&self) -> Result<Child, TransportError> {
        let config = &self.inner.config;
        let mut env = default_environment();
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(match config.stderr {
                StderrMode::Inherit => Stdio::inherit(),
                StderrMode::Log => Stdio::piped(),
                StderrMode::Discard => Stdio::null(),
            })
            .kill_on_drop(true);
        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }

        command.spawn().map_err(|source| TransportError::Spawn {
            command: config.program.clone(),
            source,
        })
    }
}

impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let (child, stdin, stdout, stderr) = {
            let mut state = lock(&self.inner.state);
            match *state {
                StdioState::Unstarted => {}
                StdioState::Started => return Err(TransportError::AlreadyStarted),
                StdioState::Closed => return Err(TransportError::NotConnected),
            }
            let mut child = self.spawn_child()?;
            *state = StdioState::Started;

            *lock(&self.inner.pid) = child.id();
            *lock(&self.inner.connected_at) = Some(Instant::now());
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| TransportError::connection("child stdout was not captured"))?;
            let stdin = child.stdin.take();
            let stderr = child.stderr.take();
            (child, stdin, stdout, stderr)
        };
        *self.inner.stdin.lock().await = stdin;

        tracing::debug!(
            command = %self.inner.config.program,
            pid = ?self.pid(),
            "spawned stdio server"
        );

        let tasks = &self.inner.tasks;
        tasks.spawn("stdio-reader", read_stdout(Arc::clone(&self.inner), stdout));
        if let Some(stderr) = stderr {
            tasks.spawn(
                "stdio-stderr",
                forward_stderr(self.inner.config.program.clone(), stderr),
            );
        }
        tasks.spawn("stdio-exit", watch_exit(Arc::clone(&self.inner), child));
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut frame = BytesMut::new();
        JsonLineCodec::with_max_line_length(self.inner.config.max_line_length)
            .encode(payload, &mut frame)?;

        let mut stdin = self.inner.stdin.lock().await;
        let writer = stdin.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;

        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let previous = std::mem::replace(&mut *lock(&self.inner.state), StdioState::Closed);
        match previous {
            StdioState::Closed => return Ok(()),
            StdioState::Unstarted => {
                self.inner.observers.emit_close();
                return Ok(());
            }
            StdioState::Started => {}
        }

        // EOF on stdin is the first shutdown request.
        self.inner.stdin.lock().await.take();

        if !self.inner.exited.is_cancelled() {
            let pid = self.pid();
            if let Some(pid) = pid {
                terminate(pid);
            }
            let grace = self.inner.config.close_grace;
            if tokio::time::timeout(grace, self.inner.exited.cancelled())
                .await
                .is_err()
            {
                tracing::warn!(
                    command = %self.inner.config.program,
                    ?grace,
                    "stdio server ignored SIGTERM, killing"
                );
            }
        }

        // Dropping the exit watcher kills a child that is still running.
        self.inner.tasks.shutdown().await;
        *lock(&self.inner.pid) = None;
        self.inner.observers.emit_close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state() == StdioState::Started && !self.inner.exited.is_cancelled()
    }

    fn metadata(&self) -> TransportMetadata {
        TransportMetadata::new("stdio")
            .remote_addr(self.inner.config.program.clone())
            .connected_at(*lock(&self.inner.connected_at))
    }

    fn observers(&self) -> &Observers {
        &self.inner.observers
    }
}

async fn read_stdout(inner: Arc<StdioInner>, mut stdout: ChildStdout) {
    let mut codec = JsonLineCodec::with_max_line_length(inner.config.max_line_length);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        match stdout.read_buf(&mut buf).await {
            Ok(0) => {
                match codec.decode_eof(&mut buf) {
                    Ok(Some(payload)) => deliver(&inner, payload),
                    Ok(None) => {}
                    Err(e) => inner.observers.emit_error(e.into()),
                }
                break;
            }
            Ok(_) => loop {
                match codec.decode(&mut buf) {
                    Ok(Some(payload)) => deliver(&inner, payload),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed line from stdio server");
                        inner.observers.emit_error(e.into());
                    }
                }
            },
            Err(e) => {
                inner.observers.emit_error(e.into());
                break;
            }
        }
    }

    tracing::debug!(command = %inner.config.program, "stdio server stdout closed");
    inner.reader_done.cancel();
}

fn deliver(inner: &StdioInner, payload: Payload) {
    inner
        .messages_received
        .fetch_add(payload.len() as u64, Ordering::Relaxed);
    inner.observers.emit_payload(payload);
}

async fn forward_stderr(command: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "mcpwire::stdio::stderr", %command, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%command, error = %e, "stopped reading server stderr");
                break;
            }
        }
    }
}

async fn watch_exit(inner: Arc<StdioInner>, mut child: Child) {
    match child.wait().await {
        Ok(status) => tracing::debug!(command = %inner.config.program, %status, "stdio server exited"),
        Err(e) => tracing::warn!(command = %inner.config.program, error = %e, "failed to wait for stdio server"),
    }
    inner.exited.cancel();

    // Deliver whatever is still buffered on stdout before announcing close.
    let _ = tokio::time::timeout(inner.config.close_grace, inner.reader_done.cancelled()).await;
    inner.stdin.lock().await.take();
    *lock(&inner.pid) = None;
    inner.observers.emit_close();
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
