use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;

use bytes::Bytes;
use cubelink_frame::{FrameConfig, FrameTransport};
use cubelink_transport::{remove_stale, CubeStream, Readiness};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::control::SimMessage;
use crate::error::{Result, SimError, StateError};
use crate::launch;
use crate::registry::{CubeId, CubeRegistry};
use crate::staging;

/// Lifecycle of a [`CubeProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeState {
    /// Spawned, not yet started.
    Ready,
    /// Emulator launched and channel connected.
    Running,
    /// Connected to an emulator this process does not own.
    Attached,
    /// Terminal.
    Stopped,
}

impl fmt::Display for CubeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Attached => "attached",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Ownership {
    Owned { id: CubeId, child: Option<Child> },
    Attached,
}

/// One virtual cube: either an emulator this process launched, or a channel
/// to one somebody else is running.
pub struct CubeProcess {
    ownership: Ownership,
    state: CubeState,
    channel_path: PathBuf,
    transport: Option<FrameTransport<CubeStream>>,
    config: SimConfig,
    frame_config: FrameConfig,
}

impl CubeProcess {
    /// Allocate a new cube owned by this process. Nothing is launched yet.
    ///
    /// The first spawn in `registry` stages assets; later spawns reuse them.
    pub fn spawn(config: &SimConfig, registry: &CubeRegistry) -> Result<Self> {
        registry.ensure_staged(|| staging::stage_assets(config))?;

        let id = registry.next_id();
        let channel_path = config.channel_path(id.get());
        debug!(%id, path = %channel_path.display(), "allocated cube");

        Ok(Self {
            ownership: Ownership::Owned { id, child: None },
            state: CubeState::Ready,
            channel_path,
            transport: None,
            config: config.clone(),
            frame_config: FrameConfig::default(),
        })
    }

    /// Connect to an emulator that is already serving `path`.
    pub fn attach(path: impl AsRef<Path>) -> Result<Self> {
        Self::attach_with_config(path, FrameConfig::default())
    }

    /// Attach with explicit frame settings.
    pub fn attach_with_config(path: impl AsRef<Path>, frame_config: FrameConfig) -> Result<Self> {
        let channel_path = path.as_ref().to_path_buf();
        info!(path = %channel_path.display(), "attaching to cube");

        let stream = CubeStream::open(&channel_path)?;
        let transport = FrameTransport::with_config_stream(stream, frame_config.clone())?;

        Ok(Self {
            ownership: Ownership::Attached,
            state: CubeState::Attached,
            channel_path,
            transport: Some(transport),
            config: SimConfig::default(),
            frame_config,
        })
    }

    /// Frame settings used when `start` connects. Spawned cubes only.
    pub fn with_frame_config(mut self, frame_config: FrameConfig) -> Self {
        self.frame_config = frame_config;
        self
    }

    /// Launch the emulator and connect to its channel.
    pub fn start(&mut self) -> Result<()> {
        let id = match (&self.ownership, self.state) {
            (Ownership::Attached, _) => return Err(StateError::Attached.into()),
            (Ownership::Owned { id, .. }, CubeState::Ready) => *id,
            (_, CubeState::Stopped) => return Err(StateError::Stopped.into()),
            (_, _) => return Err(StateError::AlreadyStarted.into()),
        };

        self.prepare_host_paths(id)?;

        let log_dir = self.config.log_dir(id.get());
        let mut child = launch::launch(&self.config, &self.channel_path, &log_dir)?;
        info!(%id, pid = child.id(), "started cube emulator");

        launch::wait_for_channel(
            &mut child,
            &self.channel_path,
            self.config.startup_timeout(),
            self.config.poll_interval(),
        )?;

        let transport = match CubeStream::open(&self.channel_path)
            .map_err(SimError::from)
            .and_then(|stream| {
                FrameTransport::with_config_stream(stream, self.frame_config.clone())
                    .map_err(SimError::from)
            }) {
            Ok(transport) => transport,
            Err(err) => {
                warn!(%id, error = %err, "could not connect to channel; killing emulator");
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        if let Ownership::Owned { child: slot, .. } = &mut self.ownership {
            *slot = Some(child);
        }
        self.transport = Some(transport);
        self.state = CubeState::Running;
        Ok(())
    }

    fn prepare_host_paths(&self, id: CubeId) -> Result<()> {
        if remove_stale(&self.channel_path)? {
            debug!(%id, path = %self.channel_path.display(), "removed stale channel");
        }

        let log_dir = self.config.log_dir(id.get());
        if !log_dir.is_dir() {
            debug!(%id, dir = %log_dir.display(), "creating log directory");
            std::fs::create_dir_all(&log_dir).map_err(|source| SimError::Staging {
                path: log_dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Ask the cube to shut down and, if owned, wait for the emulator to exit.
    ///
    /// Does nothing on a cube that was never started or is already stopped.
    /// If the shutdown request cannot be written the error is returned and
    /// the cube stays running. If waiting on the emulator fails the child
    /// handle is kept, so a later `stop()` waits again.
    pub fn stop(&mut self) -> Result<()> {
        let mut stopping = false;

        if self.transport.is_some() {
            info!(cube = %self.label(), "stopping cube");
            self.transport_mut()?.write_message_as(&SimMessage::shutdown())?;
            self.transport = None;
            stopping = true;
        }

        if let Ownership::Owned { id, child } = &mut self.ownership {
            if let Some(process) = child.as_mut() {
                info!(%id, "waiting for emulator to exit");
                let status = process.wait()?;
                debug!(%id, %status, "emulator exited");
                *child = None;
                stopping = true;
            }
        }

        if stopping {
            self.state = CubeState::Stopped;
        }
        Ok(())
    }

    /// Send raw payload bytes.
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        Ok(self.transport_mut()?.write_message(payload)?)
    }

    /// Receive raw payload bytes (blocking).
    pub fn receive_bytes(&mut self) -> Result<Bytes> {
        Ok(self.transport_mut()?.read_message()?)
    }

    /// Serialize and send a message.
    pub fn send_message<M: Serialize + ?Sized>(&mut self, message: &M) -> Result<()> {
        Ok(self.transport_mut()?.write_message_as(message)?)
    }

    /// Receive and deserialize the next message (blocking).
    pub fn receive_message<M: DeserializeOwned>(&mut self) -> Result<M> {
        Ok(self.transport_mut()?.read_message_as()?)
    }

    /// Wait until any of `instances` has data; see [`crate::select_on`].
    pub fn select_on<'a, I>(instances: I) -> Result<Vec<&'a mut CubeProcess>>
    where
        I: IntoIterator<Item = &'a mut CubeProcess>,
    {
        crate::select::select_on(instances)
    }

    /// [`select_on`](Self::select_on) with an explicit readiness source and timeout.
    pub fn select_on_with<'a, I, R>(
        instances: I,
        readiness: &R,
        timeout: Option<Duration>,
    ) -> Result<Vec<&'a mut CubeProcess>>
    where
        I: IntoIterator<Item = &'a mut CubeProcess>,
        R: Readiness + ?Sized,
    {
        crate::select::select_on_with(instances, readiness, timeout)
    }

    pub fn state(&self) -> CubeState {
        self.state
    }

    /// Identity, for spawned cubes.
    pub fn id(&self) -> Option<CubeId> {
        match &self.ownership {
            Ownership::Owned { id, .. } => Some(*id),
            Ownership::Attached => None,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Owned { .. })
    }

    /// OS process id of the emulator while running.
    pub fn pid(&self) -> Option<u32> {
        match &self.ownership {
            Ownership::Owned {
                child: Some(child), ..
            } => Some(child.id()),
            _ => None,
        }
    }

    /// Path of the channel socket or device.
    pub fn channel_path(&self) -> &Path {
        &self.channel_path
    }

    /// Short name for logs: `cube<id>` or the attached path.
    pub fn label(&self) -> String {
        match &self.ownership {
            Ownership::Owned { id, .. } => format!("cube{id}"),
            Ownership::Attached => self.channel_path.display().to_string(),
        }
    }

    pub(crate) fn transport(&self) -> Option<&FrameTransport<CubeStream>> {
        self.transport.as_ref()
    }

    fn transport_mut(&mut self) -> Result<&mut FrameTransport<CubeStream>> {
        self.transport
            .as_mut()
            .ok_or(SimError::ProcessState(StateError::NotRunning))
    }
}

impl fmt::Debug for CubeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CubeProcess")
            .field("cube", &self.label())
            .field("state", &self.state)
            .field("pid", &self.pid())
            .finish()
    }
}

impl Drop for CubeProcess {
    fn drop(&mut self) {
        if let Ownership::Owned {
            id,
            child: Some(child),
        } = &mut self.ownership
        {
            if matches!(child.try_wait(), Ok(None)) {
                warn!(%id, pid = child.id(), "cube dropped while its emulator is still running");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    use cubelink_frame::{encode_frame, SEPARATOR};

    use super::*;

    fn quiet_config(dir: &Path) -> SimConfig {
        SimConfig {
            channel_dir: dir.to_path_buf(),
            ..SimConfig::default()
        }
    }

    fn listener_in(dir: &Path, name: &str) -> (PathBuf, UnixListener) {
        let path = dir.join(name);
        let listener = UnixListener::bind(&path).unwrap();
        (path, listener)
    }

    #[test]
    fn spawn_assigns_sequential_channels() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let cfg = quiet_config(dir.path());

        let first = CubeProcess::spawn(&cfg, &registry).unwrap();
        let second = CubeProcess::spawn(&cfg, &registry).unwrap();

        assert_eq!(first.channel_path(), dir.path().join("cube0"));
        assert_eq!(second.channel_path(), dir.path().join("cube1"));
        assert_eq!(first.state(), CubeState::Ready);
        assert!(first.is_owned());
        assert_eq!(second.label(), "cube1");
        assert!(registry.is_staged());
    }

    #[test]
    fn stop_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let mut cube = CubeProcess::spawn(&quiet_config(dir.path()), &registry).unwrap();

        cube.stop().unwrap();
        cube.stop().unwrap();
        assert_eq!(cube.state(), CubeState::Ready);
        assert!(!cube.channel_path().exists());
    }

    #[test]
    fn stop_reaps_child_left_by_interrupted_stop() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let mut cube = CubeProcess::spawn(&quiet_config(dir.path()), &registry).unwrap();

        // Shutdown already delivered, emulator not yet reaped.
        let emulator = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .unwrap();
        if let Ownership::Owned { child, .. } = &mut cube.ownership {
            *child = Some(emulator);
        }
        cube.state = CubeState::Running;

        cube.stop().unwrap();
        assert_eq!(cube.state(), CubeState::Stopped);
        assert_eq!(cube.pid(), None);
        assert!(matches!(cube.start(), Err(SimError::ProcessState(StateError::Stopped))));
    }

    #[test]
    fn messaging_without_channel_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let mut cube = CubeProcess::spawn(&quiet_config(dir.path()), &registry).unwrap();

        let err = cube.send_bytes(b"x").unwrap_err();
        assert!(matches!(
            err,
            SimError::ProcessState(StateError::NotRunning)
        ));
        assert!(cube.receive_bytes().is_err());
    }

    #[test]
    fn attach_then_exchange_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (path, listener) = listener_in(dir.path(), "external");

        let mut cube = CubeProcess::attach(&path).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        assert_eq!(cube.state(), CubeState::Attached);
        assert_eq!(cube.id(), None);

        // The attach handshake is a lone separator.
        let mut hello = [0u8; 2];
        server.read_exact(&mut hello).unwrap();
        assert_eq!(hello, SEPARATOR);

        let mut wire = SEPARATOR.to_vec();
        wire.extend(frames(&[br#"{"pong":1}"#]));
        server.write_all(&wire).unwrap();

        let reply: serde_json::Value = cube.receive_message().unwrap();
        assert_eq!(reply["pong"], 1);

        cube.stop().unwrap();
        assert_eq!(cube.state(), CubeState::Stopped);

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, frames(&[br#"{"system":{"shutdown":true}}"#]));

        // Idempotent, and the channel is gone.
        cube.stop().unwrap();
        assert!(cube.send_bytes(b"late").is_err());
    }

    #[test]
    fn start_on_attached_cube_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _listener) = listener_in(dir.path(), "external");

        let mut cube = CubeProcess::attach(&path).unwrap();
        let err = cube.start().unwrap_err();
        assert!(matches!(err, SimError::ProcessState(StateError::Attached)));
    }

    #[test]
    fn attach_to_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = CubeProcess::attach(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SimError::Transport(_)));
    }

    #[test]
    fn start_without_qemu_config_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let mut cfg = quiet_config(dir.path());
        cfg.logging.host_log_dir = dir.path().join("logs");

        let mut cube = CubeProcess::spawn(&cfg, &registry).unwrap();
        let err = cube.start().unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
        assert_eq!(cube.state(), CubeState::Ready);
    }

    #[test]
    fn start_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let mut cfg = quiet_config(dir.path());
        cfg.logging.host_log_dir = dir.path().join("logs");

        let mut cube = CubeProcess::spawn(&cfg, &registry).unwrap();
        let stale = UnixListener::bind(cube.channel_path()).unwrap();
        drop(stale);
        assert!(cube.channel_path().exists());

        // Fails later on the missing QEMU config, after cleanup ran.
        assert!(cube.start().is_err());
        assert!(!cube.channel_path().exists());
        assert!(dir.path().join("logs0").is_dir());
    }

    #[test]
    fn failed_staging_fails_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CubeRegistry::new();
        let mut cfg = quiet_config(dir.path());
        cfg.qemu.disk_image = Some(dir.path().join("missing.img"));

        let err = CubeProcess::spawn(&cfg, &registry).unwrap_err();
        assert!(matches!(err, SimError::Staging { .. }));
        assert!(!registry.is_staged());
    }

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        let mut wire = bytes::BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut wire).unwrap();
        }
        wire.to_vec()
    }
}
