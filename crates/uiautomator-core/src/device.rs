use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Remote device the runner is deployed to
///
/// Implementations wrap whatever tool drives the device (for Android, `adb`).
/// The lifecycle manager only needs file transfer, kill-by-name and the local
/// path of that tool.
#[async_trait]
pub trait RemoteDevice: Send + Sync + 'static {
    /// Copy a local artifact into a directory on the device
    async fn push_file(&self, local_path: &Path, remote_dir: &str) -> Result<()>;

    /// Terminate every device process whose name matches `name`
    async fn kill_processes_by_name(&self, name: &str) -> Result<()>;

    /// Local path of the command used to drive the device
    fn executable_command_path(&self) -> PathBuf;

    /// Arguments that must precede every invocation of that command
    fn default_args(&self) -> Vec<String> {
        Vec::new()
    }
}
