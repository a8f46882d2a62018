//! Server-side command handlers.
//!
//! Handlers run on the dispatcher thread and return once the command has
//! been validated and started. Result bytes are written to the auxiliary
//! channel from a separate thread so a result larger than the channel's
//! credit cannot stall the dispatcher while the client waits for its reply.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use bytes::BytesMut;
use muxprims_mux::{Channel, Multiplexer};
use tracing::{debug, warn};

use crate::command::{Command, ExecArgs};
use crate::error::{ProxyError, Result};
use crate::exec::{self, ExecChannels};
use crate::fileinfo::FileInfo;
use crate::protocol::{APPEND, SET_ATTRIBUTES, SET_LAST_MODIFIED, SHALLOW};
use crate::wire::WireWrite;

const COPY_CHUNK: usize = 8192;

/// Execute one decoded command.
pub(crate) fn handle(mux: &Multiplexer, command: Command, exec_poll: Duration) -> Result<()> {
    match command {
        Command::Exec(args) => exec_command(mux, &args, exec_poll),
        Command::GetCwd { result } => {
            let mut buf = BytesMut::new();
            buf.put_string(&current_dir()?)?;
            send_result(mux, result, buf)
        }
        Command::GetEnv { result } => {
            let env: BTreeMap<String, String> = std::env::vars_os()
                .map(|(key, value)| {
                    (
                        key.to_string_lossy().into_owned(),
                        value.to_string_lossy().into_owned(),
                    )
                })
                .collect();
            let mut buf = BytesMut::new();
            buf.put_map(&env)?;
            send_result(mux, result, buf)
        }
        Command::GetProperties { result } => {
            let mut buf = BytesMut::new();
            buf.put_map(&properties())?;
            send_result(mux, result, buf)
        }
        Command::ChildInfos { result, path } => {
            let infos = child_infos(Path::new(&path))?;
            let mut buf = BytesMut::new();
            buf.put_count(infos.len())?;
            for info in &infos {
                info.encode(&mut buf)?;
            }
            send_result(mux, result, buf)
        }
        Command::FetchInfo { result, path } => {
            let mut buf = BytesMut::new();
            FileInfo::from_path(Path::new(&path)).encode(&mut buf)?;
            send_result(mux, result, buf)
        }
        Command::Mkdir { options, path } => {
            if options & SHALLOW != 0 {
                std::fs::create_dir(&path)?;
            } else {
                std::fs::create_dir_all(&path)?;
            }
            Ok(())
        }
        Command::Delete { path, .. } => delete(Path::new(&path)),
        Command::PutInfo {
            options,
            path,
            info,
        } => put_info(Path::new(&path), &info, options),
        Command::GetInputStream { result, path, .. } => {
            let channel = resolve(mux, result)?;
            let file = File::open(&path)?;
            spawn_worker("input", move || {
                send_file(file, &channel);
            })
        }
        Command::GetOutputStream {
            result,
            options,
            path,
        } => {
            let channel = resolve(mux, result)?;
            let mut open = OpenOptions::new();
            open.write(true).create(true);
            if options & APPEND != 0 {
                open.append(true);
            } else {
                open.truncate(true);
            }
            let file = open.open(&path)?;
            spawn_worker("output", move || {
                receive_file(&channel, file, &path);
            })
        }
    }
}

fn resolve(mux: &Multiplexer, id: u8) -> Result<Channel> {
    mux.channel(id)
        .filter(Channel::is_open)
        .ok_or(ProxyError::ChannelNotFound(id))
}

fn exec_command(mux: &Multiplexer, args: &ExecArgs, poll: Duration) -> Result<()> {
    let channels = ExecChannels {
        stdio: resolve(mux, args.stdio)?,
        stderr: resolve(mux, args.stderr)?,
        control: resolve(mux, args.control)?,
    };
    exec::spawn(args, channels, poll)
}

fn spawn_worker(role: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
    thread::Builder::new()
        .name(format!("proxy-{role}"))
        .spawn(body)?;
    Ok(())
}

/// Write `bytes` on channel `id` and half-close it.
fn send_result(mux: &Multiplexer, id: u8, bytes: BytesMut) -> Result<()> {
    let channel = resolve(mux, id)?;
    spawn_worker("result", move || {
        let mut out = &channel;
        let sent = out
            .write_all(&bytes)
            .and_then(|()| channel.shutdown_write());
        match sent {
            Ok(()) => debug!(channel = channel.id(), len = bytes.len(), "result sent"),
            Err(err) => debug!(channel = channel.id(), error = %err, "result not delivered"),
        }
    })
}

fn send_file(mut file: File, channel: &Channel) {
    let mut out = channel;
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(channel = channel.id(), error = %err, "file read failed");
                channel.close();
                return;
            }
        };
        if out.write_all(&buf[..n]).is_err() {
            return;
        }
    }
    if let Err(err) = channel.shutdown_write() {
        debug!(channel = channel.id(), error = %err, "input stream not completed");
    }
}

/// Copy the channel into `file` until end of stream, sync, then confirm by
/// half-closing the channel. On failure the channel is closed instead.
fn receive_file(channel: &Channel, mut file: File, path: &str) {
    let mut input = channel;
    let mut buf = [0u8; COPY_CHUNK];
    let copied = loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        if let Err(err) = file.write_all(&buf[..n]) {
            break Err(err);
        }
    };
    // A read of zero also follows a close from the peer; only a half close
    // means the upload is complete.
    let result = copied.and_then(|()| {
        if channel.is_open() {
            file.sync_all()
        } else {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    });
    match result {
        Ok(()) => {
            debug!(channel = channel.id(), path, "output stream written");
            if let Err(err) = channel.shutdown_write() {
                debug!(channel = channel.id(), error = %err, "output stream not confirmed");
            }
        }
        Err(err) => {
            warn!(channel = channel.id(), path, error = %err, "output stream failed");
            channel.close();
        }
    }
}

fn current_dir() -> Result<String> {
    Ok(std::env::current_dir()?.to_string_lossy().into_owned())
}

fn properties() -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        props.insert(key.to_string(), value);
    };

    set("os.name", std::env::consts::OS.to_string());
    set("os.arch", std::env::consts::ARCH.to_string());
    set("os.family", std::env::consts::FAMILY.to_string());
    set("file.separator", std::path::MAIN_SEPARATOR.to_string());
    set(
        "path.separator",
        if cfg!(windows) { ";" } else { ":" }.to_string(),
    );
    set(
        "line.separator",
        if cfg!(windows) { "\r\n" } else { "\n" }.to_string(),
    );
    let env = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .unwrap_or_default()
    };
    set("user.home", env(&["HOME", "USERPROFILE"]));
    set("user.name", env(&["USER", "USERNAME", "LOGNAME"]));
    set("user.dir", current_dir().unwrap_or_default());
    props
}

fn child_infos(path: &Path) -> Result<Vec<FileInfo>> {
    if !path.is_dir() {
        return Err(ProxyError::InvalidArgument(format!(
            "{} is not a directory",
            path.display()
        )));
    }
    let mut infos = std::fs::read_dir(path)?
        .map(|entry| entry.map(|entry| FileInfo::from_path(&entry.path())))
        .collect::<io::Result<Vec<_>>>()?;
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(infos)
}

fn delete(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn put_info(path: &Path, info: &FileInfo, options: i32) -> Result<()> {
    if options & SET_ATTRIBUTES != 0 {
        set_permissions(path, info.permissions)?;
    }
    if options & SET_LAST_MODIFIED != 0 {
        let millis = u64::try_from(info.last_modified).map_err(|_| {
            ProxyError::InvalidArgument(format!(
                "last modified time {} is before the epoch",
                info.last_modified
            ))
        })?;
        File::open(path)?.set_modified(UNIX_EPOCH + Duration::from_millis(millis))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: i32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode as u32 & 0o7777))
}

#[cfg(not(unix))]
fn set_permissions(path: &Path, mode: i32) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    std::fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "muxh-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn properties_have_every_key() {
        let props = properties();
        for key in [
            "os.name",
            "os.arch",
            "os.family",
            "file.separator",
            "path.separator",
            "line.separator",
            "user.home",
            "user.name",
            "user.dir",
        ] {
            assert!(props.contains_key(key), "missing {key}");
        }
        assert_eq!(props["os.name"], std::env::consts::OS);
    }

    #[test]
    fn child_infos_are_sorted() {
        let dir = temp_dir("sorted");
        for name in ["b", "c", "a"] {
            std::fs::write(dir.join(name), name).unwrap();
        }
        let names: Vec<_> = child_infos(&dir)
            .unwrap()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);

        let err = child_infos(&dir.join("a")).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidArgument(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn delete_handles_trees_and_missing_paths() {
        let dir = temp_dir("delete");
        let tree = dir.join("tree");
        std::fs::create_dir_all(tree.join("nested")).unwrap();
        std::fs::write(tree.join("nested/file"), b"x").unwrap();

        delete(&tree).unwrap();
        assert!(!tree.exists());
        delete(&tree).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn put_info_applies_selected_attributes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir("putinfo");
        let file = dir.join("f");
        std::fs::write(&file, b"data").unwrap();
        let info = FileInfo {
            permissions: 0o640,
            last_modified: 1_000_000_000_000,
            ..FileInfo::default()
        };

        put_info(&file, &info, SET_ATTRIBUTES).unwrap();
        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        assert_ne!(FileInfo::from_path(&file).last_modified, info.last_modified);

        put_info(&file, &info, SET_LAST_MODIFIED).unwrap();
        assert_eq!(FileInfo::from_path(&file).last_modified, info.last_modified);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
