use std::io::{self, Write};

use muxprims_proxy::protocol::APPEND;

use crate::cmd::target::Session;
use crate::cmd::{CatArgs, LsArgs, PutArgs};
use crate::exit::{io_error, proxy_error, CliResult, SUCCESS};
use crate::logging::LogLevel;
use crate::output::{print_listing, OutputFormat};

pub fn ls(args: LsArgs, format: OutputFormat, log_level: LogLevel) -> CliResult<i32> {
    let session = Session::connect(&args.target, log_level)?;
    let entries = session
        .client
        .child_infos(&args.path)
        .map_err(|err| proxy_error("ls failed", err))?;
    print_listing(&entries, format);
    session.close();
    Ok(SUCCESS)
}

pub fn cat(args: CatArgs, log_level: LogLevel) -> CliResult<i32> {
    let session = Session::connect(&args.target, log_level)?;
    let mut remote = session
        .client
        .open_input_stream(&args.path, 0)
        .map_err(|err| proxy_error("cat failed", err))?;

    let mut stdout = io::stdout().lock();
    io::copy(&mut remote, &mut stdout).map_err(|err| io_error("cat failed", err))?;
    stdout.flush().map_err(|err| io_error("cat failed", err))?;
    drop(remote);
    session.close();
    Ok(SUCCESS)
}

pub fn put(args: PutArgs, log_level: LogLevel) -> CliResult<i32> {
    let session = Session::connect(&args.target, log_level)?;
    let options = if args.append { APPEND } else { 0 };
    let mut remote = session
        .client
        .open_output_stream(&args.path, options)
        .map_err(|err| proxy_error("put failed", err))?;

    io::copy(&mut io::stdin().lock(), &mut remote).map_err(|err| io_error("put failed", err))?;
    remote
        .finish()
        .map_err(|err| proxy_error("put failed", err))?;
    session.close();
    Ok(SUCCESS)
}
