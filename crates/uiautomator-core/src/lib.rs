//! uiautomator core - platform-independent lifecycle management
//!
//! This crate provides the collaborator traits, configuration, error types and
//! the [`ProcessLifecycleManager`] state machine shared by the platform
//! backends and the facade crate.

mod archive;
mod config;
mod device;
mod error;
mod manager;
mod output;
mod process;
mod state;

pub use archive::parse_archive_name;
pub use config::*;
pub use device::RemoteDevice;
pub use error::LifecycleError;
pub use manager::{ProcessLifecycleManager, ProcessLifecycleManagerBuilder};
pub use output::{OutputLineCodec, output_lines};
pub use process::*;
pub use state::{LifecycleEvent, LifecycleState};
