use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("nitros {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: nitros");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: {} {}",
        nitros_pubsub::PROTOCOL_NAME,
        nitros_pubsub::PROTOCOL_VERSION
    );
    println!(
        "discovery: {}:{}",
        nitros_discovery::DEFAULT_GROUP,
        nitros_discovery::DEFAULT_PORT
    );
    println!("target: {}", option_env!("NITROS_BUILD_TARGET").unwrap_or("unknown"));
    println!("profile: {}", option_env!("NITROS_BUILD_PROFILE").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);

    Ok(SUCCESS)
}
