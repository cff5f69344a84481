use std::fs;

use cubelink_frame::FrameConfig;
use cubelink_sim::CubeProcess;

use crate::cmd::{parse_duration, Context, SendArgs};
use crate::exit::{io_error, sim_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::print_message;

pub fn run(args: SendArgs, ctx: &Context) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;

    let frame_config = FrameConfig {
        read_timeout: args.wait.then_some(wait_timeout),
        write_timeout: Some(wait_timeout),
        ..FrameConfig::default()
    };
    let mut cube = CubeProcess::attach_with_config(&args.path, frame_config)
        .map_err(|err| sim_error("attach failed", err))?;

    cube.send_bytes(&payload)
        .map_err(|err| sim_error("send failed", err))?;

    if args.wait {
        let reply = cube
            .receive_bytes()
            .map_err(|err| sim_error("receive failed", err))?;
        print_message(&cube.label(), &reply, ctx.format);
    }

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Err(CliError::new(
        USAGE,
        "one of --json, --data or --file is required",
    ))
}
