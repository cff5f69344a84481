use cubelink_sim::CubeProcess;

use crate::cmd::run::{pump, stop_all};
use crate::cmd::{install_ctrlc_handler, pump_frame_config, AttachArgs, Context};
use crate::exit::{sim_error, CliResult, SUCCESS};

pub fn run(args: AttachArgs, ctx: &Context) -> CliResult<i32> {
    let frame_config = pump_frame_config(&args.frame_timeout)?;
    let mut cubes = args
        .paths
        .iter()
        .map(|path| {
            CubeProcess::attach_with_config(path, frame_config.clone())
                .map_err(|err| sim_error(&format!("attach to {} failed", path.display()), err))
        })
        .collect::<CliResult<Vec<_>>>()?;

    let running = install_ctrlc_handler()?;
    let result = pump(&mut cubes, &running, args.count, ctx.format);

    if args.shutdown {
        stop_all(&mut cubes);
    }
    result.map(|_| SUCCESS)
}
