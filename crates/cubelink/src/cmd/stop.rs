use cubelink_sim::CubeProcess;
use serde::Serialize;
use tracing::info;

use crate::cmd::{Context, StopArgs};
use crate::exit::{sim_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct StopOutput {
    stopped: String,
    state: String,
}

pub fn run(args: StopArgs, ctx: &Context) -> CliResult<i32> {
    for path in &args.paths {
        let mut cube = CubeProcess::attach(path)
            .map_err(|err| sim_error(&format!("attach to {} failed", path.display()), err))?;
        cube.stop()
            .map_err(|err| sim_error(&format!("stop {} failed", path.display()), err))?;
        info!(cube = %cube.label(), "shutdown requested");

        let out = StopOutput {
            stopped: cube.label(),
            state: cube.state().to_string(),
        };
        match ctx.format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            ),
            OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
                println!("{} {}", out.stopped, out.state)
            }
        }
    }
    Ok(SUCCESS)
}
