use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cubelink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: cubelink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CUBELINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("max_payload: {}", cubelink_frame::DEFAULT_MAX_PAYLOAD);
    println!("config_env: {}", cubelink_sim::CONFIG_ENV);
    println!("features: sim={}, cli=true", cfg!(feature = "sim"));

    Ok(SUCCESS)
}
