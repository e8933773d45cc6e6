//! Child process watcher.
//!
//! Spawns a child with a null stdin and both output pipes registered with the
//! runtime's reactor. Chunks are forwarded to an [`OutputSink`] as they
//! arrive; the exit status is returned once both pipes hit EOF *and* the child
//! has been reaped. Because the status is the return value of
//! [`ProcessWatcher::watch`], it is delivered exactly once and no chunk can
//! follow it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{Result, ShellError};

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn name(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Signed exit status: `0` success, `N > 0` exit code, `-N` killed by signal `N`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub fn from_raw(value: i32) -> Self {
        Self(value)
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn success(&self) -> bool {
        self.0 == 0
    }

    /// Exit code, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        (self.0 >= 0).then_some(self.0)
    }

    /// Signal number, if the process was killed.
    pub fn signal(&self) -> Option<i32> {
        (self.0 < 0).then_some(-self.0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self(-signal);
            }
        }
        // Neither a code nor a signal: only reachable on exotic platforms.
        Self(-1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal() {
            Some(signal) => write!(f, "killed by signal {}", signal),
            None => write!(f, "exit code {}", self.0),
        }
    }
}

/// Receiver for incremental child output.
pub trait OutputSink {
    fn on_output(&mut self, stream: OutputStream, chunk: &[u8]);
}

impl<F> OutputSink for F
where
    F: FnMut(OutputStream, &[u8]),
{
    fn on_output(&mut self, stream: OutputStream, chunk: &[u8]) {
        self(stream, chunk)
    }
}

/// Sink that keeps both streams in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Chunk arrival order, by stream.
    pub order: Vec<OutputStream>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl OutputSink for CapturedOutput {
    fn on_output(&mut self, stream: OutputStream, chunk: &[u8]) {
        match stream {
            OutputStream::Stdout => self.stdout.extend_from_slice(chunk),
            OutputStream::Stderr => self.stderr.extend_from_slice(chunk),
        }
        self.order.push(stream);
    }
}

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Build from an argv-style vector; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or(ShellError::EmptyCommand)?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Spawns children and drains their output.
#[derive(Debug, Clone)]
pub struct ProcessWatcher {
    chunk_size: usize,
}

impl Default for ProcessWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ProcessWatcher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Run `spec` to completion, streaming its output into `sink`.
    ///
    /// Fails only if the child cannot be spawned or reaped.
    pub async fn watch<S>(&self, spec: &CommandSpec, sink: &mut S) -> Result<ExitStatus>
    where
        S: OutputSink + ?Sized,
    {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        debug!(program = %spec.program, pid = ?child.id(), "child spawned");

        let mut drain = StreamDrain::new(child.stdout.take(), child.stderr.take(), self.chunk_size);
        drain.run(sink).await;

        let status = ExitStatus::from(child.wait().await?);
        debug!(program = %spec.program, status = status.code(), "child reaped");
        Ok(status)
    }
}

/// Per-child pipe state: both readers, their buffers and the open counter.
struct StreamDrain {
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
    open: u8,
}

impl StreamDrain {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>, chunk_size: usize) -> Self {
        let open = u8::from(stdout.is_some()) + u8::from(stderr.is_some());
        Self {
            stdout,
            stderr,
            stdout_buf: vec![0; chunk_size],
            stderr_buf: vec![0; chunk_size],
            open,
        }
    }

    async fn run<S>(&mut self, sink: &mut S)
    where
        S: OutputSink + ?Sized,
    {
        while self.open > 0 {
            let (stream, read) = tokio::select! {
                read = read_chunk(&mut self.stdout, &mut self.stdout_buf) => (OutputStream::Stdout, read),
                read = read_chunk(&mut self.stderr, &mut self.stderr_buf) => (OutputStream::Stderr, read),
            };

            match read {
                Ok(0) => self.close(stream),
                Ok(n) => {
                    let buf = match stream {
                        OutputStream::Stdout => &self.stdout_buf,
                        OutputStream::Stderr => &self.stderr_buf,
                    };
                    sink.on_output(stream, &buf[..n]);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(stream = stream.name(), error = %err, "pipe read failed, closing stream");
                    self.close(stream);
                }
            }
        }
    }

    fn close(&mut self, stream: OutputStream) {
        let closed = match stream {
            OutputStream::Stdout => self.stdout.take().is_some(),
            OutputStream::Stderr => self.stderr.take().is_some(),
        };
        if closed {
            self.open -= 1;
            debug!(stream = stream.name(), open = self.open, "stream closed");
        }
    }
}

/// Read one chunk, or wait forever if the pipe is already closed.
async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
