use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::{Result, SimError};

/// Chardev id the guest's serial port is wired to.
pub const CHARDEV_ID: &str = "vcube_ser";
/// Fsdev id of the host log directory mapping.
pub const FSDEV_ID: &str = "host1";

/// Arguments after the emulator binary.
pub fn qemu_args(qemu_config: &Path, channel: &Path, log_dir: &Path) -> Vec<OsString> {
    let mut chardev = OsString::from("socket,path=");
    chardev.push(channel);
    chardev.push(format!(",server,nowait,id={CHARDEV_ID}"));

    let mut fsdev = OsString::from("local,path=");
    fsdev.push(log_dir);
    fsdev.push(format!(",security_model=mapped,readonly=off,id={FSDEV_ID}"));

    vec![
        "-readconfig".into(),
        qemu_config.into(),
        "-nographic".into(),
        "-chardev".into(),
        chardev,
        "-fsdev".into(),
        fsdev,
    ]
}

/// Launch the emulator for one cube with stdout discarded.
pub fn launch(config: &SimConfig, channel: &Path, log_dir: &Path) -> Result<Child> {
    let program = &config.qemu.bin_location;
    let args = qemu_args(config.qemu_config()?, channel, log_dir);
    debug!(program = %program.display(), ?args, "launching emulator");

    Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|source| SimError::Launch {
            program: program.clone(),
            source,
        })
}

/// Sleep-poll until `channel` exists.
///
/// On timeout the child is killed and reaped before
/// [`SimError::StartupTimeout`] is returned. A child that exits on its own
/// first yields [`SimError::ChildExited`].
pub fn wait_for_channel(
    child: &mut Child,
    channel: &Path,
    timeout: Option<Duration>,
    interval: Duration,
) -> Result<()> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    debug!(path = %channel.display(), ?timeout, "waiting for channel");

    loop {
        if channel.exists() {
            info!(path = %channel.display(), "channel is up");
            return Ok(());
        }

        if let Some(status) = child.try_wait()? {
            return Err(SimError::ChildExited {
                path: channel.to_path_buf(),
                status,
            });
        }

        if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
            let now = Instant::now();
            if now >= deadline {
                warn!(path = %channel.display(), ?timeout, "channel never appeared; killing emulator");
                let _ = child.kill();
                let _ = child.wait();
                return Err(SimError::StartupTimeout {
                    path: channel.to_path_buf(),
                    timeout,
                });
            }
            std::thread::sleep(interval.min(deadline - now));
        } else {
            std::thread::sleep(interval);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn sh(script: &str) -> Child {
        Command::new("/bin/sh").arg("-c").arg(script).spawn().unwrap()
    }

    #[test]
    fn argv_layout() {
        let args = qemu_args(
            Path::new("/opt/cube/qemu.cfg"),
            Path::new("/tmp/cube0"),
            Path::new("/tmp/cube_logs0"),
        );
        let expected: Vec<OsString> = [
            "-readconfig",
            "/opt/cube/qemu.cfg",
            "-nographic",
            "-chardev",
            "socket,path=/tmp/cube0,server,nowait,id=vcube_ser",
            "-fsdev",
            "local,path=/tmp/cube_logs0,security_model=mapped,readonly=off,id=host1",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn launch_requires_qemu_config() {
        let cfg = SimConfig::default();
        let err = launch(&cfg, Path::new("/tmp/x"), Path::new("/tmp/y")).unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn launch_missing_binary() {
        let mut cfg = SimConfig::default();
        cfg.qemu.bin_location = PathBuf::from("/nonexistent/qemu");
        cfg.qemu.config_location = Some(PathBuf::from("/tmp/qemu.cfg"));

        let err = launch(&cfg, Path::new("/tmp/x"), Path::new("/tmp/y")).unwrap_err();
        assert!(matches!(err, SimError::Launch { .. }));
    }

    #[test]
    fn waits_for_channel_to_appear() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("cube0");
        let mut child = sh(&format!("sleep 0.1; touch '{}'; sleep 5", channel.display()));

        wait_for_channel(
            &mut child,
            &channel,
            Some(Duration::from_secs(5)),
            Duration::from_millis(10),
        )
        .unwrap();

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("never");
        let mut child = sh("sleep 30");

        let err = wait_for_channel(
            &mut child,
            &channel,
            Some(Duration::from_millis(50)),
            Duration::from_millis(10),
        )
        .unwrap_err();

        assert!(matches!(err, SimError::StartupTimeout { .. }));
        // Already reaped.
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn early_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let channel = dir.path().join("never");
        let mut child = sh("exit 3");

        let err = wait_for_channel(&mut child, &channel, None, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, SimError::ChildExited { status, .. } if status.code() == Some(3)));
    }
}
