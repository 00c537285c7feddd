use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};
use uiautomator_core::RemoteDevice;

/// How to reach a device through `adb`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdbConfig {
    /// Explicit adb binary; resolved from `ANDROID_HOME` or `PATH` when absent
    #[serde(default)]
    pub adb_path: Option<PathBuf>,

    /// Device serial passed as `-s`; adb picks the only attached device when absent
    #[serde(default)]
    pub serial: Option<String>,
}

impl AdbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.adb_path = Some(path.into());
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<()> {
        if self.serial.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(anyhow!("serial cannot be empty"));
        }

        if self
            .adb_path
            .as_deref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(anyhow!("adb_path cannot be empty"));
        }

        Ok(())
    }
}

/// Android device driven by the `adb` command line tool
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: PathBuf,
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(config: AdbConfig) -> Self {
        let adb_path = resolve_adb_path(
            config.adb_path.as_deref(),
            std::env::var_os("ANDROID_HOME"),
        );
        debug!("Using adb at {}", adb_path.display());
        Self {
            adb_path,
            serial: config.serial,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Run adb with the device selection prepended, returning stdout
    async fn adb<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.adb_path);
        cmd.args(self.default_args()).args(args).kill_on_drop(true);

        debug!("Running {:?}", cmd.as_std());
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.adb_path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "adb exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RemoteDevice for AdbDevice {
    async fn push_file(&self, local_path: &Path, remote_dir: &str) -> Result<()> {
        self.adb([
            OsStr::new("push"),
            local_path.as_os_str(),
            OsStr::new(remote_dir),
        ])
        .await?;
        info!("Pushed {} to {}", local_path.display(), remote_dir);
        Ok(())
    }

    async fn kill_processes_by_name(&self, name: &str) -> Result<()> {
        let listing = self
            .adb(["shell", "ps"])
            .await
            .context("Failed to list device processes")?;

        let pids = parse_pids(&listing, name);
        if pids.is_empty() {
            debug!("No {name} processes running on device");
            return Ok(());
        }

        let mut args = vec!["shell".to_string(), "kill".to_string()];
        args.extend(pids.iter().map(u32::to_string));
        self.adb(&args)
            .await
            .with_context(|| format!("Failed to kill {name} processes {pids:?}"))?;

        info!("Killed {name} processes {pids:?} on device");
        Ok(())
    }

    fn executable_command_path(&self) -> PathBuf {
        self.adb_path.clone()
    }

    fn default_args(&self) -> Vec<String> {
        match &self.serial {
            Some(serial) => vec!["-s".to_string(), serial.clone()],
            None => Vec::new(),
        }
    }
}

/// Pick the adb binary: explicit path, then the SDK's platform-tools, then `PATH`
pub fn resolve_adb_path(explicit: Option<&Path>, android_home: Option<OsString>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match android_home {
        Some(home) if !home.is_empty() => PathBuf::from(home).join("platform-tools").join("adb"),
        _ => PathBuf::from("adb"),
    }
}

/// PIDs from `ps` output whose command name is exactly `name`
///
/// Rows look like `USER PID PPID VSZ RSS WCHAN ADDR S NAME`; the header and
/// rows with a non-numeric PID are skipped.
pub fn parse_pids(ps_output: &str, name: &str) -> Vec<u32> {
    ps_output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 2 || columns.last() != Some(&name) {
                return None;
            }
            columns[1].parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS_OUTPUT: &str = "\
USER           PID  PPID     VSZ    RSS WCHAN            ADDR S NAME
root             1     0   10904   2588 SyS_epoll_wait      0 S init
shell         4121   320 1004828  48120 futex_wait_queue_me 0 S uiautomator
shell         4188  4121    2152    844 0                   0 R ps
u0_a57        4200   320 1231044  61200 SyS_epoll_wait      0 S com.example.uiautomator
shell         4302   320 1004828  47996 futex_wait_queue_me 0 S uiautomator
";

    #[test]
    fn test_parse_pids_matches_exact_name() {
        assert_eq!(parse_pids(PS_OUTPUT, "uiautomator"), vec![4121, 4302]);
        assert_eq!(parse_pids(PS_OUTPUT, "init"), vec![1]);
    }

    #[test]
    fn test_parse_pids_ignores_header_and_partial_matches() {
        assert!(parse_pids(PS_OUTPUT, "NAME").is_empty());
        assert!(parse_pids(PS_OUTPUT, "automator").is_empty());
        assert!(parse_pids("", "uiautomator").is_empty());
        assert!(parse_pids("uiautomator\n", "uiautomator").is_empty());
    }

    #[test]
    fn test_resolve_adb_path() {
        let explicit = Path::new("/usr/local/bin/adb");
        assert_eq!(
            resolve_adb_path(Some(explicit), Some("/opt/android".into())),
            PathBuf::from("/usr/local/bin/adb")
        );
        assert_eq!(
            resolve_adb_path(None, Some("/opt/android".into())),
            PathBuf::from("/opt/android/platform-tools/adb")
        );
        assert_eq!(resolve_adb_path(None, Some("".into())), PathBuf::from("adb"));
        assert_eq!(resolve_adb_path(None, None), PathBuf::from("adb"));
    }

    #[test]
    fn test_default_args_carry_serial() {
        let device = AdbDevice::new(AdbConfig::new().with_adb_path("adb"));
        assert!(device.default_args().is_empty());

        let device = AdbDevice::new(
            AdbConfig::new()
                .with_adb_path("adb")
                .with_serial("emulator-5554"),
        );
        assert_eq!(device.default_args(), vec!["-s", "emulator-5554"]);
        assert_eq!(device.executable_command_path(), PathBuf::from("adb"));
    }

    #[test]
    fn test_config_from_json() {
        let config: AdbConfig =
            serde_json::from_str(r#"{"adbPath": "/sdk/platform-tools/adb", "serial": "R58M"}"#)
                .unwrap();
        assert_eq!(config.adb_path, Some(PathBuf::from("/sdk/platform-tools/adb")));
        assert_eq!(config.serial.as_deref(), Some("R58M"));
        config.validate().unwrap();

        let config: AdbConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AdbConfig::default());

        assert!(AdbConfig::new().with_serial(" ").validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_adb_binary_is_an_error() {
        let device = AdbDevice::new(AdbConfig::new().with_adb_path("/nonexistent/adb"));
        let err = device
            .push_file(Path::new("/tmp/bootstrap.jar"), "/data/local/tmp/")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to run /nonexistent/adb"));

        assert!(device.kill_processes_by_name("uiautomator").await.is_err());
    }
}
