//! Simulator configuration.
//!
//! Every key has a default so an empty file (or no file at all) is valid:
//!
//! ```toml
//! channel_dir = "/tmp"
//! startup_timeout_secs = 30   # 0 waits forever
//! poll_interval_ms = 1000
//!
//! [qemu]
//! bin_location = "qemu-system-arm"
//! config_location = "/opt/cube/qemu.cfg"
//! disk_image = "/opt/cube/disk.img"
//!
//! [binaries]
//! host_bin_dir = "/tmp/cube_bin"
//! start_list = ["bazel-bin/apps/cube_app"]
//! starter_script = "virtual_cube/starter.py"
//! config_package = "config"
//!
//! [logging]
//! host_log_dir = "/tmp/cube_logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CUBELINK_CONFIG";

/// Top-level simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimConfig {
    /// Directory that receives the `cube<id>` channel sockets.
    #[serde(default = "default_channel_dir")]
    pub channel_dir: PathBuf,
    /// How long `start` waits for the channel. Zero means no limit.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Sleep between checks for the channel during `start`.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub qemu: QemuConfig,
    #[serde(default)]
    pub binaries: BinariesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Emulator invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QemuConfig {
    #[serde(default = "default_qemu_bin")]
    pub bin_location: PathBuf,
    /// Passed to `-readconfig`. Required to start a cube.
    #[serde(default)]
    pub config_location: Option<PathBuf>,
    /// Decompressed from `<disk_image>.gz` when missing.
    #[serde(default)]
    pub disk_image: Option<PathBuf>,
}

/// Files copied into the directory shared with the guest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinariesConfig {
    /// Staging target. Staging of binaries is skipped when unset.
    #[serde(default)]
    pub host_bin_dir: Option<PathBuf>,
    #[serde(default)]
    pub start_list: Vec<PathBuf>,
    #[serde(default)]
    pub starter_script: Option<PathBuf>,
    #[serde(default)]
    pub config_package: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Prefix of per-cube log directories; the cube id is appended verbatim.
    #[serde(default = "default_host_log_dir")]
    pub host_log_dir: PathBuf,
}

impl SimConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| SimError::Config(err.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| SimError::Config(format!("{}: {err}", path.display())))?;
        toml::from_str(&text)
            .map_err(|err| SimError::Config(format!("{}: {err}", path.display())))
    }

    /// Load from `path` if given, else from `$CUBELINK_CONFIG`, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| SimError::Config(err.to_string()))
    }

    /// Bounded wait for the channel, or `None` to wait forever.
    pub fn startup_timeout(&self) -> Option<Duration> {
        (self.startup_timeout_secs > 0).then(|| Duration::from_secs(self.startup_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Channel socket path for cube `id`.
    pub fn channel_path(&self, id: u64) -> PathBuf {
        self.channel_dir.join(format!("cube{id}"))
    }

    /// Host log directory for cube `id`.
    pub fn log_dir(&self, id: u64) -> PathBuf {
        let mut dir = self.logging.host_log_dir.clone().into_os_string();
        dir.push(id.to_string());
        PathBuf::from(dir)
    }

    /// The `-readconfig` file, required before a cube can start.
    pub fn qemu_config(&self) -> Result<&Path> {
        self.qemu
            .config_location
            .as_deref()
            .ok_or_else(|| SimError::Config("qemu.config_location is not set".to_string()))
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            channel_dir: default_channel_dir(),
            startup_timeout_secs: default_startup_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            qemu: QemuConfig::default(),
            binaries: BinariesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for QemuConfig {
    fn default() -> Self {
        Self {
            bin_location: default_qemu_bin(),
            config_location: None,
            disk_image: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            host_log_dir: default_host_log_dir(),
        }
    }
}

fn default_channel_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_qemu_bin() -> PathBuf {
    PathBuf::from("qemu-system-arm")
}

fn default_host_log_dir() -> PathBuf {
    PathBuf::from("/tmp/cube_logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = SimConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, SimConfig::default());
        assert_eq!(cfg.channel_path(0), PathBuf::from("/tmp/cube0"));
        assert_eq!(cfg.startup_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_sections_fill_in() {
        let cfg = SimConfig::from_toml_str(
            r#"
            channel_dir = "/run/cubes"
            startup_timeout_secs = 0

            [qemu]
            config_location = "/opt/cube/qemu.cfg"

            [binaries]
            host_bin_dir = "/tmp/bin"
            start_list = ["a", "b"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.channel_path(3), PathBuf::from("/run/cubes/cube3"));
        assert_eq!(cfg.startup_timeout(), None);
        assert_eq!(cfg.qemu.bin_location, PathBuf::from("qemu-system-arm"));
        assert_eq!(cfg.qemu_config().unwrap(), Path::new("/opt/cube/qemu.cfg"));
        assert_eq!(cfg.binaries.start_list.len(), 2);
        assert!(cfg.binaries.starter_script.is_none());
        assert_eq!(cfg.logging, LoggingConfig::default());
    }

    #[test]
    fn log_dir_appends_id() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.log_dir(12), PathBuf::from("/tmp/cube_logs12"));
    }

    #[test]
    fn missing_qemu_config_is_reported() {
        let err = SimConfig::default().qemu_config().unwrap_err();
        assert!(matches!(err, SimError::Config(msg) if msg.contains("config_location")));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = SimConfig::from_toml_str("channel_dir = [").unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn load_from_file_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cubelink.toml");

        let mut cfg = SimConfig::default();
        cfg.poll_interval_ms = 50;
        cfg.qemu.disk_image = Some(PathBuf::from("/opt/cube/disk.img"));
        std::fs::write(&path, cfg.to_toml_string().unwrap()).unwrap();

        assert_eq!(SimConfig::load(&path).unwrap(), cfg);
        assert_eq!(SimConfig::resolve(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn load_missing_file_names_path() {
        let err = SimConfig::load("/nonexistent/cubelink.toml").unwrap_err();
        assert!(matches!(err, SimError::Config(msg) if msg.contains("/nonexistent/cubelink.toml")));
    }
}
