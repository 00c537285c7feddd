use anyhow::Result;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uiautomator_core::{
    ExitCallback, ExitStatus, OutputStream, ProcessError, ProcessId, ReadinessDetector,
    Subprocess, SubprocessConfig, output_lines,
};

type ExitWatch = watch::Sender<Option<ExitStatus>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local subprocess backed by `tokio::process`
///
/// The child is placed in its own process group so that stopping it also
/// reaches whatever it spawned. Output from both pipes is decoded into lines
/// for the readiness detector and logged at debug level.
pub struct UnixSubprocess {
    command: String,
    args: Vec<String>,
    config: SubprocessConfig,
    started: AtomicBool,
    pid: Arc<Mutex<Option<ProcessId>>>,
    callbacks: Arc<Mutex<Vec<ExitCallback>>>,
    exit: Arc<ExitWatch>,
}

impl std::fmt::Debug for UnixSubprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSubprocess")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("pid", &self.pid())
            .field("exit_status", &self.exit_status())
            .finish_non_exhaustive()
    }
}

impl UnixSubprocess {
    pub fn new(command: &str, args: &[String], config: SubprocessConfig) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            config,
            started: AtomicBool::new(false),
            pid: Arc::new(Mutex::new(None)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            exit: Arc::new(exit),
        }
    }

    /// Exit status, once the process has terminated
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit.borrow()
    }

    fn spawn_child(&self) -> Result<Child, ProcessError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // New process group for signalling the whole tree
            .process_group(0);

        cmd.spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", self.command)))
    }
}

#[async_trait]
impl Subprocess for UnixSubprocess {
    fn command(&self) -> &str {
        &self.command
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn pid(&self) -> Option<ProcessId> {
        *lock(&self.pid)
    }

    fn on_exit(&self, callback: ExitCallback) {
        lock(&self.callbacks).push(callback);
    }

    async fn start(&self, detector: Box<dyn ReadinessDetector>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyStarted.into());
        }

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let pid = child.id();
        *lock(&self.pid) = pid;
        info!(
            "Spawned Unix process: {} (PID: {:?}) with args: {:?}",
            self.command, pid, self.args
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(watch_output(
            child.stdout.take(),
            child.stderr.take(),
            detector,
            ready_tx,
        ));

        let mut exit_rx = self.exit.subscribe();
        tokio::spawn(reap(
            child,
            Arc::clone(&self.pid),
            Arc::clone(&self.callbacks),
            Arc::clone(&self.exit),
        ));

        let ready = async {
            tokio::select! {
                biased;
                Ok(()) = ready_rx => Ok(()),
                status = wait_for_exit(&mut exit_rx) => Err(ProcessError::ExitedDuringStartup(status)),
            }
        };

        let outcome = match self.config.startup_timeout() {
            Some(limit) => match tokio::time::timeout(limit, ready).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        "Process {} not ready after {:?}, killing it",
                        self.command, limit
                    );
                    if let Some(pid) = pid {
                        if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                            warn!("Failed to kill process group {pid}: {e}");
                        }
                    }
                    Err(ProcessError::Timeout(limit.as_millis() as u64))
                }
            },
            None => ready.await,
        };

        outcome?;
        debug!("Process {} reported ready", self.command);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut exit_rx = self.exit.subscribe();
        if exit_rx.borrow().is_some() {
            return Ok(());
        }
        let Some(pid) = self.pid() else {
            if self.started.load(Ordering::SeqCst) {
                // Reaped, exit callbacks still running.
                let status = wait_for_exit(&mut exit_rx).await;
                debug!("Process {} already exited with {status}", self.command);
            } else {
                debug!("Stop requested for {} before it was started", self.command);
            }
            return Ok(());
        };

        signal_group(pid, Signal::SIGTERM)?;
        info!("Sent SIGTERM to process group {pid}");

        let grace = self.config.stop_grace();
        match tokio::time::timeout(grace, wait_for_exit(&mut exit_rx)).await {
            Ok(status) => {
                debug!("Process {pid} stopped with {status}");
            }
            Err(_) => {
                warn!("Process {pid} still running after {grace:?}, sending SIGKILL");
                signal_group(pid, Signal::SIGKILL)?;
                let status = wait_for_exit(&mut exit_rx).await;
                debug!("Process {pid} killed with {status}");
            }
        }

        Ok(())
    }
}

impl Drop for UnixSubprocess {
    fn drop(&mut self) {
        if self.exit.borrow().is_some() {
            return;
        }
        if let Some(pid) = self.pid() {
            warn!("Emergency cleanup: killing process group {pid} during drop");
            if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                warn!("Failed to kill process group {pid} during drop: {e}");
            }
        }
    }
}

/// Signal every process in the group led by `pid`; a vanished group is not an error
fn signal_group(pid: ProcessId, sig: Signal) -> Result<(), ProcessError> {
    let pgid = NixPid::from_raw(pid as i32);
    match signal::killpg(pgid, sig) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {pid} not found (already terminated)");
            Ok(())
        }
        Err(e) => Err(ProcessError::SignalFailed {
            pid,
            reason: format!("{}: {e}", sig.as_str()),
        }),
    }
}

async fn wait_for_exit(rx: &mut watch::Receiver<Option<ExitStatus>>) -> ExitStatus {
    match rx.wait_for(Option::is_some).await {
        Ok(status) => (*status).unwrap_or_default(),
        // The sender lives as long as the subprocess handle.
        Err(_) => ExitStatus::default(),
    }
}

async fn watch_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    mut detector: Box<dyn ReadinessDetector>,
    ready: oneshot::Sender<()>,
) {
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        warn!("Process output is not piped, readiness can not be detected");
        return;
    };

    let lines = output_lines(stdout, OutputStream::Stdout)
        .merge(output_lines(stderr, OutputStream::Stderr));
    tokio::pin!(lines);

    let mut ready = Some(ready);
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                debug!("[{:?}] {}", line.stream, line.text);
                if ready.is_some() && detector.is_ready(&line) {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Err(e) => {
                warn!("Failed to read process output: {e}");
                break;
            }
        }
    }
}

async fn reap(
    mut child: Child,
    pid: Arc<Mutex<Option<ProcessId>>>,
    callbacks: Arc<Mutex<Vec<ExitCallback>>>,
    exit: Arc<ExitWatch>,
) {
    let status = match child.wait().await {
        Ok(status) => ExitStatus {
            code: status.code(),
            signal: status.signal(),
        },
        Err(e) => {
            warn!("Failed to wait for process: {e}");
            ExitStatus::default()
        }
    };
    let exited_pid = lock(&pid).take();
    info!("Process {:?} exited with {}", exited_pid, status);

    // Callbacks run before `stop` observes the exit.
    let callbacks = lock(&callbacks).clone();
    for callback in callbacks {
        callback(status);
    }
    exit.send_replace(Some(status));
}
