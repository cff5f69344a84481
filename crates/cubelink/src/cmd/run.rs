use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cubelink_frame::FrameError;
use cubelink_sim::{select_on_with, CubeProcess, CubeRegistry, SimError};
use cubelink_transport::PollReadiness;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, pump_frame_config, Context, RunArgs};
use crate::exit::{sim_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_cubes, print_message, OutputFormat};

/// How often the receive loop wakes up to check for Ctrl-C.
const WAKE_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: RunArgs, ctx: &Context) -> CliResult<i32> {
    if args.cubes == 0 {
        return Err(CliError::new(USAGE, "--cubes must be at least 1"));
    }

    let mut config = ctx.load_config()?;
    if let Some(timeout) = &args.startup_timeout {
        config.startup_timeout_secs = parse_duration(timeout)?.as_secs().max(1);
    }

    let frame_config = pump_frame_config(&args.frame_timeout)?;
    let registry = CubeRegistry::global();
    let mut cubes = Vec::with_capacity(args.cubes);
    for _ in 0..args.cubes {
        let started = CubeProcess::spawn(&config, registry).and_then(|cube| {
            let mut cube = cube.with_frame_config(frame_config.clone());
            cube.start()?;
            Ok(cube)
        });
        match started {
            Ok(cube) => cubes.push(cube),
            Err(err) => {
                stop_all(&mut cubes);
                return Err(sim_error("failed to start cube", err));
            }
        }
    }
    info!(count = cubes.len(), "cubes running");
    print_cubes(&cubes, ctx.format);

    let running = install_ctrlc_handler()?;
    let result = pump(&mut cubes, &running, args.count, ctx.format);
    stop_all(&mut cubes);
    result.map(|_| SUCCESS)
}

/// Print messages from `cubes` until `running` clears or `limit` is hit.
pub(crate) fn pump(
    cubes: &mut [CubeProcess],
    running: &AtomicBool,
    limit: Option<usize>,
    format: OutputFormat,
) -> CliResult<usize> {
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let ready = select_on_with(cubes.iter_mut(), &PollReadiness, Some(WAKE_INTERVAL))
            .map_err(|err| sim_error("select failed", err))?;

        for cube in ready {
            let label = cube.label();
            let payload = match cube.receive_bytes() {
                Ok(payload) => payload,
                Err(err) if is_read_timeout(&err) => {
                    debug!(cube = %label, "frame incomplete, waiting for the rest");
                    continue;
                }
                Err(err) => return Err(sim_error(&format!("receive from {label} failed"), err)),
            };
            print_message(&label, &payload, format);
            printed += 1;

            if limit.is_some_and(|limit| printed >= limit) {
                return Ok(printed);
            }
        }
    }

    Ok(printed)
}

/// A read timeout leaves the partial frame buffered for the next call.
fn is_read_timeout(err: &SimError) -> bool {
    matches!(
        err,
        SimError::Frame(FrameError::Io(io))
            if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    )
}

/// Stop every cube, logging failures instead of returning early.
pub(crate) fn stop_all(cubes: &mut [CubeProcess]) {
    for cube in cubes.iter_mut() {
        if let Err(err) = cube.stop() {
            warn!(cube = %cube.label(), error = %err, "failed to stop cube");
        }
    }
}
