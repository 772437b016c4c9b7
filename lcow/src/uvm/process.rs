//! Guest process handles and their stdio plumbing.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use lcow_shared::LcowResult;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte source wired to a guest process's stdin.
pub type GuestSource = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink wired to a guest process's stdout or stderr.
pub type GuestSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Description of a process to start inside the utility VM.
///
/// Unset stdio endpoints are not connected.
pub struct ProcessConfig {
    pub args: Vec<String>,
    /// Run in the utility VM itself rather than inside a container in it.
    pub create_in_utility_vm: bool,
    pub stdin: Option<GuestSource>,
    pub stdout: Option<GuestSink>,
    pub stderr: Option<GuestSink>,
}

impl ProcessConfig {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            create_in_utility_vm: true,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn stdin(mut self, source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(source));
        self
    }

    pub fn stdout(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    pub fn stderr(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }

    /// Command line as a single string, for logs and errors.
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("args", &self.args)
            .field("create_in_utility_vm", &self.create_in_utility_vm)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Bytes moved over a guest process's stdio, shared with the executor.
#[derive(Debug, Clone, Default)]
pub struct IoCounters {
    inner: Arc<IoCountersInner>,
}

#[derive(Debug, Default)]
struct IoCountersInner {
    stdin: AtomicU64,
    stdout: AtomicU64,
    stderr: AtomicU64,
}

impl IoCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stdin(&self, bytes: u64) {
        self.inner.stdin.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_stdout(&self, bytes: u64) {
        self.inner.stdout.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_stderr(&self, bytes: u64) {
        self.inner.stderr.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn stdin(&self) -> u64 {
        self.inner.stdin.load(Ordering::Relaxed)
    }

    pub fn stdout(&self) -> u64 {
        self.inner.stdout.load(Ordering::Relaxed)
    }

    pub fn stderr(&self) -> u64 {
        self.inner.stderr.load(Ordering::Relaxed)
    }
}

/// Handle to one process running inside the utility VM.
///
/// Owns the guest-side process until [`close`](GuestProcess::close) is called.
#[async_trait]
pub trait GuestProcess: Send {
    /// Wait for the process to exit. Unbounded; callers apply the timeout.
    async fn wait(&mut self) -> LcowResult<()>;

    /// Exit code of a process that has exited.
    fn exit_code(&self) -> LcowResult<i32>;

    /// Terminate the process.
    async fn kill(&mut self) -> LcowResult<()>;

    /// Release the guest-side process.
    async fn close(self: Box<Self>) -> LcowResult<()>;

    /// Stdio byte counters, updated as the executor pumps data.
    fn io_counters(&self) -> IoCounters;
}

/// In-memory stdio sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes directly, outside of any process.
    pub fn append(&self, bytes: &[u8]) {
        self.inner.lock().extend_from_slice(bytes);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
