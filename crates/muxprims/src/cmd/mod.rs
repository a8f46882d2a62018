use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod exec;
pub mod files;
pub mod info;
pub mod serve;
pub mod target;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the command protocol on stdin/stdout or a Unix socket.
    Serve(ServeArgs),
    /// Run a command on the server and relay its stdio.
    Exec(ExecArgs),
    /// Show the server's working directory and system properties.
    Info(InfoArgs),
    /// List a directory on the server.
    Ls(LsArgs),
    /// Copy a file from the server to stdout.
    Cat(CatArgs),
    /// Copy stdin to a file on the server.
    Put(PutArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, log_level: LogLevel) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Exec(args) => exec::run(args, log_level),
        Command::Info(args) => info::run(args, format, log_level),
        Command::Ls(args) => files::ls(args, format, log_level),
        Command::Cat(args) => files::cat(args, log_level),
        Command::Put(args) => files::put(args, log_level),
        Command::Version(args) => version::run(args),
    }
}

/// Where the server runs.
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Connect to a server listening on this Unix socket.
    #[arg(long, env = "MUXPRIMS_SOCKET", conflicts_with = "server")]
    pub socket: Option<PathBuf>,
    /// Spawn this program as the server and talk to it over its stdio.
    /// Default: this executable.
    #[arg(long, value_name = "PROGRAM")]
    pub server: Option<PathBuf>,
    /// Argument for the spawned server (repeatable). Default: `serve`.
    #[arg(long = "server-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub server_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Accept connections on this Unix socket instead of serving stdin/stdout.
    #[arg(long, env = "MUXPRIMS_SOCKET")]
    pub socket: Option<PathBuf>,
    /// Exit poll interval for running processes, in milliseconds.
    #[arg(long, value_name = "MS", default_value = "50")]
    pub poll_ms: u64,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Do not forward stdin; the remote process sees end of input at once.
    #[arg(long)]
    pub no_stdin: bool,
    /// Merge the remote stderr into stdout.
    #[arg(long)]
    pub merge_stderr: bool,
    /// Remote working directory (absolute).
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<String>,
    /// Environment variable for the remote process (repeatable).
    #[arg(long, value_name = "KEY=VALUE")]
    pub env: Vec<String>,
    /// Start from an empty environment instead of the server's.
    #[arg(long)]
    pub clear_env: bool,
    /// Command line to run.
    #[arg(last = true, required = true, value_name = "ARGV")]
    pub argv: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Include the server's environment.
    #[arg(long)]
    pub env: bool,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Directory on the server.
    pub path: String,
}

#[derive(Args, Debug)]
pub struct CatArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// File on the server.
    pub path: String,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// File on the server.
    pub path: String,
    /// Append instead of truncating.
    #[arg(long)]
    pub append: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
