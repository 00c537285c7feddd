#[cfg(unix)]
mod unix_subprocess;

#[cfg(unix)]
pub use unix_subprocess::UnixSubprocess;

use uiautomator_core::SubprocessConfig;

/// Creates [`UnixSubprocess`] handles sharing one timing policy
#[derive(Debug, Clone, Default)]
pub struct UnixSubprocessFactory {
    config: SubprocessConfig,
}

impl UnixSubprocessFactory {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }

    pub fn platform_name() -> &'static str {
        "Unix"
    }
}

#[cfg(unix)]
impl uiautomator_core::SubprocessFactory for UnixSubprocessFactory {
    type Process = UnixSubprocess;

    fn create(&self, command: &str, args: &[String]) -> UnixSubprocess {
        UnixSubprocess::new(command, args, self.config.clone())
    }
}
