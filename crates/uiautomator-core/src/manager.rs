use crate::archive::parse_archive_name;
use crate::config::{AutomatorConfig, StartParams};
use crate::device::RemoteDevice;
use crate::error::LifecycleError;
use crate::process::{ExitCallback, ExitStatus, ReadinessDetector, Subprocess, SubprocessFactory};
use crate::state::{LifecycleEvent, LifecycleState};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// State shared between the manager and the exit callback of its process
struct Shared<P> {
    state: LifecycleState,
    alive: bool,
    starting: bool,
    /// Bumped on every `start` so exit callbacks of older processes are ignored
    generation: u64,
    process: Option<Arc<P>>,
}

impl<P> Shared<P> {
    fn new() -> Self {
        Self {
            state: LifecycleState::Stopped,
            alive: false,
            starting: false,
            generation: 0,
            process: None,
        }
    }
}

/// A failed launch, carrying the process if it had already come up
struct LaunchFailure<P> {
    error: LifecycleError,
    alive: Option<Arc<P>>,
}

impl<P> From<LifecycleError> for LaunchFailure<P> {
    fn from(error: LifecycleError) -> Self {
        Self { error, alive: None }
    }
}

fn lock<P>(shared: &Mutex<Shared<P>>) -> MutexGuard<'_, Shared<P>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move to `to` and publish it; a transition to the current state is dropped
fn transition<P>(
    shared: &mut Shared<P>,
    events: &broadcast::Sender<LifecycleEvent>,
    to: LifecycleState,
) -> bool {
    if shared.state == to {
        return false;
    }
    debug!("Runner state changed: {} -> {}", shared.state, to);
    shared.state = to;
    // No subscribers is not an error.
    let _ = events.send(LifecycleEvent::StateChanged { state: to });
    true
}

/// Owns one runner process on a remote device and drives it through
/// `Stopped -> Starting -> Online -> Stopping -> Stopped`
///
/// The runner is deployed by pushing its archive with the [`RemoteDevice`],
/// then launched through a local [`Subprocess`] that invokes the device tool.
/// Every state change is published on a broadcast channel, see
/// [`subscribe`](Self::subscribe).
pub struct ProcessLifecycleManager<D: RemoteDevice, F: SubprocessFactory> {
    device: Arc<D>,
    factory: F,
    config: AutomatorConfig,
    shared: Arc<Mutex<Shared<F::Process>>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl<D: RemoteDevice, F: SubprocessFactory> ProcessLifecycleManager<D, F> {
    pub fn builder() -> ProcessLifecycleManagerBuilder<D, F> {
        ProcessLifecycleManagerBuilder::new()
    }

    /// Subscribe to state changes and start errors
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.shared).state
    }

    /// True between a successful `start` and the exit of the process
    pub fn is_running(&self) -> bool {
        lock(&self.shared).alive
    }

    /// The owned runner process, if any
    pub fn process(&self) -> Option<Arc<F::Process>> {
        lock(&self.shared).process.clone()
    }

    pub fn config(&self) -> &AutomatorConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Deploy and launch the runner, returning once `detector` reports it ready
    ///
    /// On failure an [`LifecycleEvent::Error`] is published before the error is
    /// returned. A failure before the process came up leaves the state at
    /// `Starting`; the exit callback moves it to `Stopped` if the process
    /// terminates later.
    pub async fn start<R: ReadinessDetector>(
        &self,
        params: &StartParams,
        detector: R,
    ) -> Result<Arc<F::Process>, LifecycleError> {
        let generation = {
            let mut shared = lock(&self.shared);
            if shared.starting || shared.process.is_some() {
                return Err(LifecycleError::AlreadyStarted);
            }
            shared.starting = true;
            shared.generation += 1;
            transition(&mut shared, &self.events, LifecycleState::Starting);
            shared.generation
        };

        info!("Starting uiautomator runner with class {}", params.class_name);
        let result = self.launch(params, detector, generation).await;
        lock(&self.shared).starting = false;

        match result {
            Ok(process) => Ok(process),
            Err(LaunchFailure { error: e, alive }) => {
                let _ = self.events.send(LifecycleEvent::Error(e.clone()));
                self.cleanup_failed_start(generation, alive).await;
                error!("Failed to start uiautomator runner: {e}");
                Err(e)
            }
        }
    }

    async fn launch<R: ReadinessDetector>(
        &self,
        params: &StartParams,
        detector: R,
        generation: u64,
    ) -> Result<Arc<F::Process>, LaunchFailure<F::Process>> {
        debug!("Parsing runner archive name from {}", params.artifact_path);
        let archive_name =
            parse_archive_name(&params.artifact_path, &self.config.archive_extension)?;

        self.device
            .push_file(Path::new(&params.artifact_path), &self.config.staging_dir)
            .await
            .map_err(|e| {
                LifecycleError::transfer_error(format!(
                    "Failed to push {} to {}: {e:#}",
                    params.artifact_path, self.config.staging_dir
                ))
            })?;

        self.kill_remote_process().await;

        let args = self.build_args(&archive_name, params);
        let command = self
            .device
            .executable_command_path()
            .to_string_lossy()
            .into_owned();
        debug!("Executing command {} {:?}", command, args);

        let process = Arc::new(self.factory.create(&command, &args));
        process.on_exit(self.exit_callback(generation));
        lock(&self.shared).process = Some(Arc::clone(&process));

        process
            .start(Box::new(detector))
            .await
            .map_err(|e| LifecycleError::spawn_error(format!("{e:#}")))?;

        let mut shared = lock(&self.shared);
        let still_owned = shared
            .process
            .as_ref()
            .is_some_and(|owned| Arc::ptr_eq(owned, &process));
        if !still_owned || shared.state != LifecycleState::Starting {
            return Err(LaunchFailure {
                error: LifecycleError::spawn_error("Runner process stopped before it came online"),
                alive: Some(process),
            });
        }
        shared.alive = true;
        transition(&mut shared, &self.events, LifecycleState::Online);
        info!("uiautomator runner is online");

        Ok(process)
    }

    /// Release the handle of a failed start; a process that had come up is
    /// also killed on the device and stopped locally
    async fn cleanup_failed_start(&self, generation: u64, alive: Option<Arc<F::Process>>) {
        {
            let mut shared = lock(&self.shared);
            if shared.generation == generation {
                shared.process = None;
            }
        }

        let Some(process) = alive else {
            return;
        };
        self.kill_remote_process().await;
        if let Err(e) = process.stop().await {
            warn!("Failed to stop runner process after failed start: {e:#}");
        }
    }

    /// Stop the runner and remove leftover processes from the device
    ///
    /// Does nothing when no process is owned and fails with
    /// [`LifecycleError::StartInProgress`] while a `start` is pending. A
    /// failure to stop the local process is returned after the state has
    /// reached `Stopped`.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let (process, generation) = {
            let mut shared = lock(&self.shared);
            if shared.starting {
                warn!("Shutdown requested while the runner is still starting");
                return Err(LifecycleError::StartInProgress);
            }
            let Some(process) = shared.process.clone() else {
                debug!("Shutdown requested without a runner process, nothing to do");
                return Ok(());
            };
            transition(&mut shared, &self.events, LifecycleState::Stopping);
            (process, shared.generation)
        };

        info!("Shutting down uiautomator runner");
        let stopped = process.stop().await;
        self.kill_remote_process().await;

        {
            let mut shared = lock(&self.shared);
            if shared.generation == generation {
                shared.alive = false;
                shared.process = None;
                transition(&mut shared, &self.events, LifecycleState::Stopped);
            }
        }

        stopped.map_err(|e| {
            LifecycleError::stop_error(format!("Failed to stop runner process: {e:#}"))
        })
    }

    /// Best-effort removal of every runner process on the device
    pub async fn kill_remote_process(&self) {
        kill_remote(self.device.as_ref(), &self.config.process_name).await;
    }

    /// Full argument list handed to the device tool
    pub fn build_args(&self, archive_name: &str, params: &StartParams) -> Vec<String> {
        let mut args = self.device.default_args();
        args.extend(self.config.runner_args.iter().cloned());
        args.push(archive_name.to_string());
        args.push(self.config.class_flag.clone());
        args.push(params.class_name.clone());
        args.extend(params.extra_args.iter().cloned());
        args
    }

    fn exit_callback(&self, generation: u64) -> ExitCallback {
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();

        Arc::new(move |status: ExitStatus| {
            let mut shared = lock(&shared);
            if shared.generation != generation {
                debug!("Ignoring exit of a previous runner process ({status})");
                return;
            }

            shared.alive = false;
            if shared.state.is_unexpected_exit() {
                error!("UiAutomator exited unexpectedly with {status}");
            } else if shared.state.expects_exit() {
                debug!("UiAutomator shut down normally");
            }
            shared.process = None;
            transition(&mut shared, &events, LifecycleState::Stopped);
        })
    }
}

async fn kill_remote<D: RemoteDevice + ?Sized>(device: &D, process_name: &str) {
    if let Err(e) = device.kill_processes_by_name(process_name).await {
        let e = LifecycleError::kill_error(format!("{e:#}"));
        warn!("Error while killing {process_name} on device: {e}");
    }
}

impl<D: RemoteDevice, F: SubprocessFactory> Drop for ProcessLifecycleManager<D, F> {
    fn drop(&mut self) {
        let Some(process) = lock(&self.shared).process.take() else {
            return;
        };

        warn!("Lifecycle manager dropped with a live runner process - attempting cleanup");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let device = Arc::clone(&self.device);
                let process_name = self.config.process_name.clone();
                handle.spawn(async move {
                    if let Err(e) = process.stop().await {
                        warn!("Emergency stop of runner process failed: {e:#}");
                    }
                    kill_remote(device.as_ref(), &process_name).await;
                });
            }
            Err(_) => {
                warn!("No async runtime available, runner process left to its own devices");
            }
        }
    }
}

/// Builder for [`ProcessLifecycleManager`]
pub struct ProcessLifecycleManagerBuilder<D, F> {
    device: Option<Arc<D>>,
    factory: Option<F>,
    config: AutomatorConfig,
    event_capacity: usize,
}

impl<D: RemoteDevice, F: SubprocessFactory> Default for ProcessLifecycleManagerBuilder<D, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RemoteDevice, F: SubprocessFactory> ProcessLifecycleManagerBuilder<D, F> {
    pub fn new() -> Self {
        Self {
            device: None,
            factory: None,
            config: AutomatorConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn device(mut self, device: Arc<D>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn subprocess_factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(mut self, config: AutomatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of undelivered events a slow subscriber may fall behind by
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<ProcessLifecycleManager<D, F>, LifecycleError> {
        let device = self.device.ok_or_else(|| {
            LifecycleError::construction_error("a remote device is required to manage uiautomator")
        })?;
        let factory = self.factory.ok_or_else(|| {
            LifecycleError::construction_error("a subprocess factory is required")
        })?;
        self.config
            .validate()
            .map_err(|e| LifecycleError::construction_error(e.to_string()))?;

        let (events, _) = broadcast::channel(self.event_capacity.max(1));

        Ok(ProcessLifecycleManager {
            device,
            factory,
            config: self.config,
            shared: Arc::new(Mutex::new(Shared::new())),
            events,
        })
    }
}
