use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a local process
pub type ProcessId = u32;

/// How a process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns true if the process exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code {code}, ")?,
            None => write!(f, "code none, ")?,
        }
        match self.signal {
            Some(signal) => write!(f, "signal {signal}"),
            None => write!(f, "signal none"),
        }
    }
}

/// Which pipe a line of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One decoded line of subprocess output, without the trailing newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// Decides when a freshly spawned process is usable
///
/// The detector is fed every output line until it first returns `true`.
/// Closures of the form `FnMut(&OutputLine) -> bool` implement it directly.
pub trait ReadinessDetector: Send + 'static {
    fn is_ready(&mut self, line: &OutputLine) -> bool;
}

impl<F> ReadinessDetector for F
where
    F: FnMut(&OutputLine) -> bool + Send + 'static,
{
    fn is_ready(&mut self, line: &OutputLine) -> bool {
        self(line)
    }
}

/// Ready once any line on either stream contains `needle`
#[derive(Debug, Clone)]
pub struct LineContains {
    needle: String,
}

impl LineContains {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
        }
    }
}

impl ReadinessDetector for LineContains {
    fn is_ready(&mut self, line: &OutputLine) -> bool {
        line.text.contains(&self.needle)
    }
}

/// Invoked once per process termination, whatever the cause
pub type ExitCallback = Arc<dyn Fn(ExitStatus) + Send + Sync>;

/// Error types for local subprocess operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process already started")]
    AlreadyStarted,
    #[error("Process exited during startup with {0}")]
    ExitedDuringStartup(ExitStatus),
    #[error("Process did not become ready within {0} ms")]
    Timeout(u64),
    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: ProcessId, reason: String },
}

/// Trait representing a local subprocess that drives the remote runner
///
/// All methods take `&self`; implementations keep their mutable state behind
/// interior locks so the lifecycle manager can share the handle with callers
/// and with its exit callback.
#[async_trait]
pub trait Subprocess: Send + Sync + 'static {
    /// Get the command that starts this process
    fn command(&self) -> &str;

    /// Get the arguments passed to this process
    fn args(&self) -> &[String];

    /// Get the process ID (None before start or after exit)
    fn pid(&self) -> Option<ProcessId>;

    /// Register a notification fired exactly once when the process terminates
    fn on_exit(&self, callback: ExitCallback);

    /// Launch the process and wait until `detector` reports readiness
    ///
    /// Fails if the process cannot be spawned or exits before it is ready.
    async fn start(&self, detector: Box<dyn ReadinessDetector>) -> Result<()>;

    /// Request termination and wait until the process has exited
    async fn stop(&self) -> Result<()>;
}

/// Factory trait for creating subprocess handles bound to a command line
pub trait SubprocessFactory: Send + Sync + 'static {
    /// The type of subprocess this factory creates
    type Process: Subprocess;

    fn create(&self, command: &str, args: &[String]) -> Self::Process;
}
