mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "muxprims", version, about = "Channel multiplexer and remote command proxy")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.log_level);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exec_with_trailing_argv() {
        let cli = Cli::try_parse_from([
            "muxprims",
            "exec",
            "--socket",
            "/tmp/test.sock",
            "--env",
            "A=1",
            "--",
            "ls",
            "-la",
        ])
        .expect("exec args should parse");

        let Command::Exec(args) = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.argv, ["ls", "-la"]);
        assert_eq!(args.env, ["A=1"]);
        assert_eq!(
            args.target.socket.as_deref(),
            Some(std::path::Path::new("/tmp/test.sock"))
        );
    }

    #[test]
    fn exec_requires_a_command() {
        let err = Cli::try_parse_from(["muxprims", "exec"]).expect_err("argv is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn socket_conflicts_with_server() {
        let err = Cli::try_parse_from([
            "muxprims",
            "ls",
            "--socket",
            "/tmp/test.sock",
            "--server",
            "muxprims",
            "/",
        ])
        .expect_err("conflicting targets should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_put_append() {
        let cli = Cli::try_parse_from(["muxprims", "put", "/tmp/out", "--append"])
            .expect("put args should parse");
        assert!(matches!(cli.command, Command::Put(ref args) if args.append));
    }
}
