#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast};
use uiautomator_core::{
    ExitCallback, ExitStatus, LifecycleError, LifecycleEvent, LifecycleState, OutputLine,
    ProcessId, ReadinessDetector, Subprocess, SubprocessFactory,
};

pub const ADB_PATH: &str = "/opt/android/platform-tools/adb";

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Push { local: PathBuf, remote_dir: String },
    Kill { name: String },
}

#[derive(Default)]
pub struct MockDevice {
    calls: Mutex<Vec<DeviceCall>>,
    fail_push: bool,
    fail_kill: bool,
    default_args: Vec<String>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_push() -> Self {
        Self {
            fail_push: true,
            ..Self::default()
        }
    }

    pub fn failing_kill() -> Self {
        Self {
            fail_kill: true,
            ..Self::default()
        }
    }

    pub fn with_default_args(args: &[&str]) -> Self {
        Self {
            default_args: args.iter().map(|arg| arg.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, DeviceCall::Kill { .. }))
            .count()
    }
}

#[async_trait]
impl uiautomator_core::RemoteDevice for MockDevice {
    async fn push_file(&self, local_path: &Path, remote_dir: &str) -> Result<()> {
        self.calls.lock().unwrap().push(DeviceCall::Push {
            local: local_path.to_path_buf(),
            remote_dir: remote_dir.to_string(),
        });
        if self.fail_push {
            return Err(anyhow!("adb: error: failed to copy: device offline"));
        }
        Ok(())
    }

    async fn kill_processes_by_name(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(DeviceCall::Kill {
            name: name.to_string(),
        });
        if self.fail_kill {
            return Err(anyhow!("kill: permission denied"));
        }
        Ok(())
    }

    fn executable_command_path(&self) -> PathBuf {
        PathBuf::from(ADB_PATH)
    }

    fn default_args(&self) -> Vec<String> {
        self.default_args.clone()
    }
}

/// What a mock subprocess does when started
#[derive(Debug, Clone)]
pub enum StartBehavior {
    Ready,
    Fail(String),
    ExitDuringStartup(ExitStatus),
    /// Feed these lines to the detector, failing if none makes it ready
    Output(Vec<OutputLine>),
    /// Become ready only once the gate is notified
    Gated(Arc<Notify>),
    /// Become ready, but exit before `start` returns
    ReadyThenExit(ExitStatus),
}

/// What a mock subprocess does when stopped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopBehavior {
    /// Exit by SIGTERM and fire the exit callbacks
    Exit,
    /// Return without ever reporting the exit
    Silent,
    Fail,
}

pub struct MockSubprocess {
    command: String,
    args: Vec<String>,
    start_behavior: StartBehavior,
    stop_behavior: StopBehavior,
    callbacks: Mutex<Vec<ExitCallback>>,
    exited: Mutex<bool>,
    stop_calls: Mutex<usize>,
    total_stop_calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockSubprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSubprocess")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("exited", &*self.exited.lock().unwrap())
            .finish_non_exhaustive()
    }
}

impl MockSubprocess {
    /// Report an exit nobody asked for
    pub fn simulate_exit(&self, status: ExitStatus) {
        self.fire_exit(status);
    }

    pub fn stop_calls(&self) -> usize {
        *self.stop_calls.lock().unwrap()
    }

    fn fire_exit(&self, status: ExitStatus) {
        {
            let mut exited = self.exited.lock().unwrap();
            if *exited {
                return;
            }
            *exited = true;
        }
        let callbacks = self.callbacks.lock().unwrap().clone();
        for callback in callbacks {
            callback(status);
        }
    }
}

#[async_trait]
impl Subprocess for MockSubprocess {
    fn command(&self) -> &str {
        &self.command
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn pid(&self) -> Option<ProcessId> {
        if *self.exited.lock().unwrap() {
            None
        } else {
            Some(4242)
        }
    }

    fn on_exit(&self, callback: ExitCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    async fn start(&self, mut detector: Box<dyn ReadinessDetector>) -> Result<()> {
        match &self.start_behavior {
            StartBehavior::Ready => Ok(()),
            StartBehavior::Fail(reason) => Err(anyhow!("{reason}")),
            StartBehavior::ExitDuringStartup(status) => {
                self.fire_exit(*status);
                Err(anyhow!("Process exited during startup with {status}"))
            }
            StartBehavior::Output(lines) => {
                if lines.iter().any(|line| detector.is_ready(line)) {
                    Ok(())
                } else {
                    Err(anyhow!("Output ended before the runner was ready"))
                }
            }
            StartBehavior::Gated(gate) => {
                gate.notified().await;
                Ok(())
            }
            StartBehavior::ReadyThenExit(status) => {
                self.fire_exit(*status);
                Ok(())
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        *self.stop_calls.lock().unwrap() += 1;
        self.total_stop_calls.fetch_add(1, Ordering::SeqCst);
        match self.stop_behavior {
            StopBehavior::Exit => {
                self.fire_exit(ExitStatus::from_signal(15));
                Ok(())
            }
            StopBehavior::Silent => Ok(()),
            StopBehavior::Fail => Err(anyhow!("Failed to signal process 4242: EPERM")),
        }
    }
}

#[derive(Clone)]
pub struct MockFactory {
    start_behavior: Arc<Mutex<StartBehavior>>,
    stop_behavior: Arc<Mutex<StopBehavior>>,
    created: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    stop_calls: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            start_behavior: Arc::new(Mutex::new(StartBehavior::Ready)),
            stop_behavior: Arc::new(Mutex::new(StopBehavior::Exit)),
            created: Arc::new(Mutex::new(Vec::new())),
            stop_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_start(self, behavior: StartBehavior) -> Self {
        self.set_start(behavior);
        self
    }

    pub fn with_stop(self, behavior: StopBehavior) -> Self {
        *self.stop_behavior.lock().unwrap() = behavior;
        self
    }

    pub fn set_start(&self, behavior: StartBehavior) {
        *self.start_behavior.lock().unwrap() = behavior;
    }

    pub fn created(&self) -> Vec<(String, Vec<String>)> {
        self.created.lock().unwrap().clone()
    }

    /// Stop calls across every process this factory created
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl SubprocessFactory for MockFactory {
    type Process = MockSubprocess;

    fn create(&self, command: &str, args: &[String]) -> MockSubprocess {
        self.created
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec()));
        MockSubprocess {
            command: command.to_string(),
            args: args.to_vec(),
            start_behavior: self.start_behavior.lock().unwrap().clone(),
            stop_behavior: *self.stop_behavior.lock().unwrap(),
            callbacks: Mutex::new(Vec::new()),
            exited: Mutex::new(false),
            stop_calls: Mutex::new(0),
            total_stop_calls: Arc::clone(&self.stop_calls),
        }
    }
}

/// Drain everything published so far
pub fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn states(events: &[LifecycleEvent]) -> Vec<LifecycleState> {
    events.iter().filter_map(LifecycleEvent::state).collect()
}

pub fn errors(events: &[LifecycleEvent]) -> Vec<LifecycleError> {
    events
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::Error(e) => Some(e.clone()),
            LifecycleEvent::StateChanged { .. } => None,
        })
        .collect()
}

/// Log output captured for the current thread
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Route tracing output of this thread into a buffer until the guard drops
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
