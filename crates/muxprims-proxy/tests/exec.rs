#![cfg(unix)]

mod common;

use std::io::{BufRead, BufReader, Read, Write};
use std::time::{Duration, Instant};

use common::{temp_dir, Session};
use muxprims_proxy::{ExecRequest, ProxyError};

#[test]
fn cat_echoes_lines_and_exits_zero() {
    let session = Session::start();
    let process = session.client.exec(&ExecRequest::new(["cat"])).unwrap();

    let mut stdin = process.stdin();
    for i in 0..10 {
        writeln!(stdin, "{i}").unwrap();
    }
    process.close_stdin().unwrap();

    let mut joined = String::new();
    for line in BufReader::new(process.stdout()).lines() {
        joined.push_str(&line.unwrap());
    }
    assert_eq!(joined, "0123456789");
    assert_eq!(process.wait().unwrap(), 0);
    assert_eq!(process.exit_code(), Some(0));

    drop(process);
    session.finish();
}

#[test]
fn exit_code_is_available_without_waiting() {
    let session = Session::start();
    let process = session.client.exec(&ExecRequest::new(["true"])).unwrap();
    process.close_stdin().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut code = process.exit_code();
    while code.is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
        code = process.exit_code();
    }
    assert_eq!(code, Some(0));
    assert_eq!(process.wait().unwrap(), 0);

    drop(process);
    session.finish();
}

#[test]
fn destroy_kills_a_long_running_process() {
    let session = Session::start();
    let process = session
        .client
        .exec(&ExecRequest::new(["sleep", "60"]))
        .unwrap();

    assert_eq!(process.exit_code(), None);
    let started = Instant::now();
    process.destroy().unwrap();
    let code = process.wait().unwrap();
    assert_ne!(code, 0);
    assert_eq!(code, 128 + libc::SIGKILL);
    assert!(started.elapsed() < Duration::from_secs(30));

    drop(process);
    session.finish();
}

#[test]
fn exit_code_and_stderr_are_forwarded() {
    let session = Session::start();
    let process = session
        .client
        .exec(&ExecRequest::new(["sh", "-c", "echo oops 1>&2; exit 7"]))
        .unwrap();
    process.close_stdin().unwrap();

    let mut err = String::new();
    let mut stderr = process.stderr();
    stderr.read_to_string(&mut err).unwrap();
    assert_eq!(err, "oops\n");
    assert_eq!(process.wait().unwrap(), 7);

    drop(process);
    session.finish();
}

#[test]
fn redirect_merges_stderr_into_stdout() {
    let session = Session::start();
    let request = ExecRequest::new(["sh", "-c", "echo out; echo err 1>&2"]).redirect_stderr(true);
    let process = session.client.exec(&request).unwrap();
    process.close_stdin().unwrap();

    let mut out = String::new();
    let mut stdout = process.stdout();
    stdout.read_to_string(&mut out).unwrap();
    assert!(out.contains("out\n") && out.contains("err\n"), "got {out:?}");

    let mut err = Vec::new();
    let mut stderr = process.stderr();
    stderr.read_to_end(&mut err).unwrap();
    assert!(err.is_empty());
    assert_eq!(process.wait().unwrap(), 0);

    drop(process);
    session.finish();
}

#[test]
fn environment_and_directory_are_applied() {
    let session = Session::start();
    let dir = temp_dir("execdir");
    let dir = dir.canonicalize().unwrap();

    let request = ExecRequest::new(["sh", "-c", "echo \"$MUXP_VALUE:$PWD\""])
        .env("MUXP_VALUE", "42")
        .dir(dir.to_string_lossy());
    let process = session.client.exec(&request).unwrap();
    process.close_stdin().unwrap();

    let mut out = String::new();
    let mut stdout = process.stdout();
    stdout.read_to_string(&mut out).unwrap();
    assert_eq!(out.trim_end(), format!("42:{}", dir.display()));
    assert_eq!(process.wait().unwrap(), 0);

    drop(process);
    session.finish();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn replacing_the_environment_drops_server_variables() {
    let session = Session::start();
    let request = ExecRequest::new(["/bin/sh", "-c", "echo \"[$HOME]\""]).append_env(false);
    let process = session.client.exec(&request).unwrap();
    process.close_stdin().unwrap();

    let mut out = String::new();
    let mut stdout = process.stdout();
    stdout.read_to_string(&mut out).unwrap();
    assert_eq!(out.trim_end(), "[]");

    drop(process);
    session.finish();
}

#[test]
fn spawn_failure_is_reported_and_session_continues() {
    let session = Session::start();
    let err = session
        .client
        .exec(&ExecRequest::new(["/definitely/not/a/program"]))
        .unwrap_err();
    match err {
        ProxyError::Remote(message) => assert!(message.contains("/definitely/not/a/program")),
        other => panic!("unexpected error: {other}"),
    }

    assert!(!session.client.getcwd().unwrap().is_empty());
    session.finish();
}
