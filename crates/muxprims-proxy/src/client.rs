use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;
use muxprims_mux::{Channel, Multiplexer, MuxConfig, MuxError};
use muxprims_transport::IpcStream;
use tracing::{debug, info};

use crate::command::{Command, ExecArgs};
use crate::error::{ProxyError, Result};
use crate::fileinfo::FileInfo;
use crate::process::RemoteProcess;
use crate::protocol::{PROTO_ERROR, PROTO_OK, PROTO_SHUTDOWN};
use crate::wire::WireRead;

/// What to run with [`ProxyClient::exec`].
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory on the server; empty keeps the server's own.
    pub dir: String,
    pub redirect_stderr: bool,
    /// `true` merges `env` into the server's environment, `false` replaces it.
    pub append_env: bool,
}

impl ExecRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            dir: String::new(),
            redirect_stderr: false,
            append_env: true,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    pub fn append_env(mut self, append: bool) -> Self {
        self.append_env = append;
        self
    }
}

/// Client side of the command protocol.
///
/// Commands are serialized: one request is in flight on the command channel
/// at a time, even when the client is shared between threads.
pub struct ProxyClient {
    mux: Multiplexer,
    command: Mutex<Channel>,
}

impl ProxyClient {
    /// Multiplex over `stream` and open the command channel.
    pub fn connect(stream: IpcStream, config: MuxConfig) -> Result<Self> {
        Self::new(Multiplexer::from_stream(stream, config)?)
    }

    /// Use an existing multiplexer, starting it if needed.
    pub fn new(mux: Multiplexer) -> Result<Self> {
        match mux.start() {
            Ok(()) | Err(MuxError::AlreadyStarted) => {}
            Err(err) => return Err(err.into()),
        }
        let command = match mux.command_channel() {
            Some(channel) => channel,
            None => mux.open_channel()?,
        };
        if !command.is_command() {
            return Err(ProxyError::Protocol(
                "multiplexer already has a command channel".into(),
            ));
        }
        info!(mux = %mux.name(), channel = command.id(), "proxy client connected");
        Ok(Self {
            mux,
            command: Mutex::new(command),
        })
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// Send one command and wait for its reply.
    ///
    /// Auxiliary channels named by the command must already be open.
    pub fn send_command(&self, command: &Command) -> Result<()> {
        let mut buf = BytesMut::new();
        command.encode(&mut buf)?;

        let channel = self.command.lock().unwrap_or_else(PoisonError::into_inner);
        let mut io = &*channel;
        io.write_all(&buf)?;
        io.flush()?;
        debug!(opcode = command.opcode().name(), "command sent");

        match io.read_u8()? {
            PROTO_OK => Ok(()),
            PROTO_ERROR => Err(ProxyError::Remote(io.read_string()?)),
            other => Err(ProxyError::Protocol(format!(
                "unexpected reply marker {other}"
            ))),
        }
    }

    /// Current directory of the server process.
    pub fn getcwd(&self) -> Result<String> {
        let result = self.fetch_result(|result| Command::GetCwd { result })?;
        (&result[..]).read_string()
    }

    /// Environment of the server process.
    pub fn getenv(&self) -> Result<BTreeMap<String, String>> {
        let result = self.fetch_result(|result| Command::GetEnv { result })?;
        (&result[..]).read_map()
    }

    /// System properties of the server (`os.name`, `user.home`, ...).
    pub fn get_properties(&self) -> Result<BTreeMap<String, String>> {
        let result = self.fetch_result(|result| Command::GetProperties { result })?;
        (&result[..]).read_map()
    }

    /// Entries of a remote directory, sorted by name.
    pub fn child_infos(&self, path: &str) -> Result<Vec<FileInfo>> {
        let result = self.fetch_result(|result| Command::ChildInfos {
            result,
            path: path.to_string(),
        })?;
        let mut input = &result[..];
        let count = input.read_count()?;
        (0..count).map(|_| FileInfo::decode(&mut input)).collect()
    }

    /// Attributes of one remote path.
    pub fn fetch_info(&self, path: &str) -> Result<FileInfo> {
        let result = self.fetch_result(|result| Command::FetchInfo {
            result,
            path: path.to_string(),
        })?;
        FileInfo::decode(&mut &result[..])
    }

    /// Create a directory; recursive unless `options` has
    /// [`crate::protocol::SHALLOW`].
    pub fn mkdir(&self, path: &str, options: i32) -> Result<()> {
        self.send_command(&Command::Mkdir {
            options,
            path: path.to_string(),
        })
    }

    /// Delete a file or directory tree. Deleting a missing path succeeds.
    pub fn delete(&self, path: &str, options: i32) -> Result<()> {
        self.send_command(&Command::Delete {
            options,
            path: path.to_string(),
        })
    }

    /// Apply attributes selected by `options` to a remote path.
    pub fn put_info(&self, path: &str, info: &FileInfo, options: i32) -> Result<()> {
        self.send_command(&Command::PutInfo {
            options,
            path: path.to_string(),
            info: info.clone(),
        })
    }

    /// Stream a remote file's contents.
    pub fn open_input_stream(&self, path: &str, options: i32) -> Result<RemoteFile> {
        let channel = self.mux.open_channel()?;
        let command = Command::GetInputStream {
            result: channel.id(),
            options,
            path: path.to_string(),
        };
        self.send_or_close(&command, &[&channel])?;
        Ok(RemoteFile { channel })
    }

    /// Write a remote file. Call [`RemoteFile::finish`] to make sure every
    /// byte reached the disk.
    pub fn open_output_stream(&self, path: &str, options: i32) -> Result<RemoteFile> {
        let channel = self.mux.open_channel()?;
        let command = Command::GetOutputStream {
            result: channel.id(),
            options,
            path: path.to_string(),
        };
        self.send_or_close(&command, &[&channel])?;
        Ok(RemoteFile { channel })
    }

    /// Start a process on the server.
    pub fn exec(&self, request: &ExecRequest) -> Result<RemoteProcess> {
        if request.argv.is_empty() {
            return Err(ProxyError::InvalidArgument("empty command line".into()));
        }
        let stdio = self.mux.open_channel()?;
        let stderr = self.mux.open_channel()?;
        let control = self.mux.open_channel()?;
        let command = Command::Exec(ExecArgs {
            stdio: stdio.id(),
            stderr: stderr.id(),
            control: control.id(),
            argv: request.argv.clone(),
            env: request.env.clone(),
            dir: request.dir.clone(),
            redirect: request.redirect_stderr,
            append_env: request.append_env,
        });
        self.send_or_close(&command, &[&stdio, &stderr, &control])?;
        debug!(program = %request.argv[0], "remote process started");
        RemoteProcess::new(stdio, stderr, control)
    }

    /// Stop the server's dispatcher and shut the multiplexer down.
    pub fn shutdown(&self) -> Result<()> {
        let result = {
            let channel = self.command.lock().unwrap_or_else(PoisonError::into_inner);
            let mut io = &*channel;
            io.write_all(&[PROTO_SHUTDOWN]).and_then(|()| io.flush())
        };
        self.mux.shutdown();
        info!(mux = %self.mux.name(), "proxy client shut down");
        result.map_err(ProxyError::from)
    }

    fn send_or_close(&self, command: &Command, channels: &[&Channel]) -> Result<()> {
        let result = self.send_command(command);
        if result.is_err() {
            for channel in channels {
                channel.close();
            }
        }
        result
    }

    /// Run a command whose answer arrives on a fresh channel, read it to the
    /// end and close the channel.
    fn fetch_result(&self, make: impl FnOnce(u8) -> Command) -> Result<Vec<u8>> {
        let channel = self.mux.open_channel()?;
        let command = make(channel.id());
        self.send_or_close(&command, &[&channel])?;

        let mut result = Vec::new();
        let read = (&channel).read_to_end(&mut result);
        channel.close();
        read?;
        Ok(result)
    }
}

impl std::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("mux", &self.mux)
            .finish()
    }
}

/// A remote file opened for reading or writing.
///
/// Reading returns end of stream after the last byte. Writes must be
/// completed with [`RemoteFile::finish`]. Dropping the handle closes the
/// channel.
#[derive(Debug)]
pub struct RemoteFile {
    channel: Channel,
}

impl RemoteFile {
    /// Flush, end the upload and wait until the server has synced the file.
    ///
    /// The server closes the channel instead of confirming when the file
    /// could not be written.
    pub fn finish(self) -> Result<()> {
        self.channel.shutdown_write()?;
        let mut rest = Vec::new();
        (&self.channel).read_to_end(&mut rest)?;
        if !self.channel.is_open() {
            return Err(ProxyError::Remote(format!(
                "channel {} closed before the transfer was confirmed",
                self.channel.id()
            )));
        }
        Ok(())
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.channel).read(buf)
    }
}

impl Write for RemoteFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.channel).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&self.channel).flush()
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        self.channel.close();
    }
}
