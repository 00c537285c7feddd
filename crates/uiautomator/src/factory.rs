use uiautomator_core::{SubprocessConfig, SubprocessFactory};

#[cfg(not(unix))]
compile_error!("uiautomator only provides a subprocess backend for unix targets");

/// Platform-independent factory that selects the subprocess backend at compile time
#[derive(Debug, Clone, Default)]
pub struct PlatformSubprocessFactory {
    #[cfg(unix)]
    inner: uiautomator_unix::UnixSubprocessFactory,
}

impl PlatformSubprocessFactory {
    pub fn new(config: SubprocessConfig) -> Self {
        #[cfg(unix)]
        return Self {
            inner: uiautomator_unix::UnixSubprocessFactory::new(config),
        };
    }

    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        return uiautomator_unix::UnixSubprocessFactory::platform_name();
    }
}

impl SubprocessFactory for PlatformSubprocessFactory {
    #[cfg(unix)]
    type Process = uiautomator_unix::UnixSubprocess;

    fn create(&self, command: &str, args: &[String]) -> Self::Process {
        #[cfg(unix)]
        return self.inner.create(command, args);
    }
}
