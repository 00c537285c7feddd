//! Drive a uiautomator test runner on an Android device through `adb`
//!
//! ```no_run
//! use uiautomator::{AdbConfig, AutomatorConfig, LineContains, StartParams, SubprocessConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! uiautomator::init_logging();
//! let automator = uiautomator::adb_automator(
//!     AdbConfig::new().with_serial("emulator-5554"),
//!     AutomatorConfig::default(),
//!     SubprocessConfig::default(),
//! )?;
//!
//! let params = StartParams::new("/tmp/bootstrap.jar", "io.appium.android.bootstrap.Bootstrap");
//! automator.start(&params, LineContains::new("Appium Socket Server Ready")).await?;
//! automator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod adb;
mod factory;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub use adb::{AdbConfig, AdbDevice, parse_pids, resolve_adb_path};
pub use factory::PlatformSubprocessFactory;
pub use uiautomator_core::*;

/// Lifecycle manager wired to a real device and local subprocesses
pub type UiAutomator = ProcessLifecycleManager<AdbDevice, PlatformSubprocessFactory>;

/// Build a [`UiAutomator`] for the device described by `adb`
pub fn adb_automator(
    adb: AdbConfig,
    config: AutomatorConfig,
    subprocess: SubprocessConfig,
) -> Result<UiAutomator, LifecycleError> {
    adb.validate()
        .map_err(|e| LifecycleError::construction_error(format!("Invalid adb config: {e}")))?;
    subprocess.validate().map_err(|e| {
        LifecycleError::construction_error(format!("Invalid subprocess config: {e}"))
    })?;

    ProcessLifecycleManager::builder()
        .device(Arc::new(AdbDevice::new(adb)))
        .subprocess_factory(PlatformSubprocessFactory::new(subprocess))
        .config(config)
        .build()
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`)
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_line_number(true)
        .try_init();
}
