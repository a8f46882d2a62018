use crate::cmd::target::Session;
use crate::cmd::InfoArgs;
use crate::exit::{proxy_error, CliResult, SUCCESS};
use crate::logging::LogLevel;
use crate::output::{print_server_info, OutputFormat, ServerInfo};

pub fn run(args: InfoArgs, format: OutputFormat, log_level: LogLevel) -> CliResult<i32> {
    let session = Session::connect(&args.target, log_level)?;
    let client = &session.client;

    let cwd = client
        .getcwd()
        .map_err(|err| proxy_error("getcwd failed", err))?;
    let properties = client
        .get_properties()
        .map_err(|err| proxy_error("getproperties failed", err))?;
    let environment = if args.env {
        Some(
            client
                .getenv()
                .map_err(|err| proxy_error("getenv failed", err))?,
        )
    } else {
        None
    };

    print_server_info(
        &ServerInfo {
            cwd,
            properties,
            environment,
        },
        format,
    );
    session.close();
    Ok(SUCCESS)
}
