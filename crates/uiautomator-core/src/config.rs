use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Describes how the runner is laid out on the device and invoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into))]
pub struct AutomatorConfig {
    /// Remote directory the runner archive is pushed into
    #[serde(default = "default_staging_dir")]
    #[builder(default = "default_staging_dir()")]
    pub staging_dir: String,

    /// Arguments that select the runner on the device, placed before the archive name
    #[serde(default = "default_runner_args")]
    #[builder(default = "default_runner_args()", setter(custom))]
    pub runner_args: Vec<String>,

    /// Flag that precedes the class identifier
    #[serde(default = "default_class_flag")]
    #[builder(default = "default_class_flag()")]
    pub class_flag: String,

    /// Extension the artifact file name must carry, without the dot
    #[serde(default = "default_archive_extension")]
    #[builder(default = "default_archive_extension()")]
    pub archive_extension: String,

    /// Remote process name used for stale and leftover process cleanup
    #[serde(default = "default_process_name")]
    #[builder(default = "default_process_name()")]
    pub process_name: String,
}

impl Default for AutomatorConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            runner_args: default_runner_args(),
            class_flag: default_class_flag(),
            archive_extension: default_archive_extension(),
            process_name: default_process_name(),
        }
    }
}

impl AutomatorConfig {
    pub fn builder() -> AutomatorConfigBuilder {
        AutomatorConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.staging_dir.is_empty() {
            return Err(anyhow::anyhow!("staging_dir cannot be empty"));
        }

        if self.archive_extension.is_empty() || self.archive_extension.starts_with('.') {
            return Err(anyhow::anyhow!(
                "archive_extension must be a bare extension such as \"jar\""
            ));
        }

        if self.process_name.is_empty() {
            return Err(anyhow::anyhow!("process_name cannot be empty"));
        }

        Ok(())
    }
}

impl AutomatorConfigBuilder {
    pub fn runner_args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.runner_args = Some(args);
        self
    }
}

/// Caller-supplied parameters for a single `start` call
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct StartParams {
    /// Local path of the runner archive, e.g. `/tmp/build/bootstrap.jar`
    pub artifact_path: String,
    /// Test class the runner should execute
    pub class_name: String,
    /// Appended verbatim after the class identifier
    #[builder(default)]
    #[builder(setter(custom))]
    pub extra_args: Vec<String>,
}

impl StartParams {
    pub fn new(artifact_path: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            class_name: class_name.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn builder() -> StartParamsBuilder {
        StartParamsBuilder::default()
    }
}

impl StartParamsBuilder {
    pub fn extra_args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.extra_args = Some(args);
        self
    }

    pub fn extra_arg<S: ToString>(&mut self, arg: S) -> &mut Self {
        self.extra_args
            .get_or_insert_with(Vec::new)
            .push(arg.to_string());
        self
    }
}

/// Timing policy of a local subprocess backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubprocessConfig {
    /// Give up waiting for readiness after this long (None waits forever)
    #[serde(default)]
    pub startup_timeout_ms: Option<u64>,

    /// Time between the graceful stop signal and the forced kill
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: None,
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl SubprocessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.startup_timeout_ms == Some(0) {
            return Err(anyhow::anyhow!(
                "startup_timeout_ms must be positive, omit it to wait indefinitely"
            ));
        }

        if self.stop_grace_ms > 60_000 {
            return Err(anyhow::anyhow!("stop_grace_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_ms.map(Duration::from_millis)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

// Default value functions for serde
fn default_staging_dir() -> String {
    "/data/local/tmp/".to_string()
}
fn default_runner_args() -> Vec<String> {
    vec![
        "shell".to_string(),
        "uiautomator".to_string(),
        "runtest".to_string(),
    ]
}
fn default_class_flag() -> String {
    "-c".to_string()
}
fn default_archive_extension() -> String {
    "jar".to_string()
}
fn default_process_name() -> String {
    "uiautomator".to_string()
}
fn default_stop_grace_ms() -> u64 {
    5_000
}
