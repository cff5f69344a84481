use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use cubelink_frame::FrameConfig;
use cubelink_sim::SimConfig;

use crate::exit::{sim_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod attach;
pub mod doctor;
pub mod run;
pub mod send;
pub mod stop;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn cubes, print what they send, stop them on Ctrl-C.
    Run(RunArgs),
    /// Attach to running cubes and print what they send.
    Attach(AttachArgs),
    /// Send a single message to a running cube.
    Send(SendArgs),
    /// Ask running cubes to shut down.
    Stop(StopArgs),
    /// Check the host environment and configuration.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub format: OutputFormat,
    pub config_path: Option<PathBuf>,
}

impl Context {
    pub fn load_config(&self) -> CliResult<SimConfig> {
        SimConfig::resolve(self.config_path.as_deref())
            .map_err(|err| sim_error("failed to load config", err))
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, ctx),
        Command::Attach(args) => attach::run(args, ctx),
        Command::Send(args) => send::run(args, ctx),
        Command::Stop(args) => stop::run(args, ctx),
        Command::Doctor(args) => doctor::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of cubes to spawn.
    #[arg(long, short = 'n', default_value = "1")]
    pub cubes: usize,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Override the configured startup timeout (e.g. 30s, 500ms).
    #[arg(long)]
    pub startup_timeout: Option<String>,
    /// Longest wait for the rest of a partially received frame.
    #[arg(long, default_value = "1s")]
    pub frame_timeout: String,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Channel paths of running cubes.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Send the shutdown request to every cube on exit.
    #[arg(long)]
    pub shutdown: bool,
    /// Longest wait for the rest of a partially received frame.
    #[arg(long, default_value = "1s")]
    pub frame_timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Channel path of a running cube.
    pub path: PathBuf,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one message back and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Channel paths of running cubes.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Frame settings for cubes driven by the receive loop, so a stalled
/// partial frame never blocks past `timeout`.
pub(crate) fn pump_frame_config(timeout: &str) -> CliResult<FrameConfig> {
    let timeout = parse_duration(timeout)?;
    Ok(FrameConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        ..FrameConfig::default()
    })
}

pub(crate) fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}
