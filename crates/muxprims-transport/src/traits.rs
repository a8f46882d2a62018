use std::io::{Read, Write};

use crate::error::Result;

/// Readable half of a split [`IpcStream`].
pub type ReadHalf = Box<dyn Read + Send>;

/// Writable half of a split [`IpcStream`].
pub type WriteHalf = Box<dyn Write + Send>;

/// A connected duplex byte stream — implements Read + Write.
///
/// The multiplexer reads and writes from two different threads, so the
/// stream is normally consumed with [`IpcStream::into_split`].
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Pipes {
        kind: &'static str,
        reader: ReadHalf,
        writer: WriteHalf,
    },
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
            IpcStreamInner::Pipes { reader, .. } => reader.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
            IpcStreamInner::Pipes { writer, .. } => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
            IpcStreamInner::Pipes { writer, .. } => writer.flush(),
        }
    }
}

impl IpcStream {
    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Build a stream from two independent one-way pipes.
    pub fn from_pipes(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        Self::pipes("pipes", Box::new(reader), Box::new(writer))
    }

    /// This process's own stdin (read) and stdout (write).
    ///
    /// Anything else printed to stdout corrupts the stream; log to stderr.
    pub fn stdio() -> Self {
        Self::pipes(
            "stdio",
            Box::new(std::io::stdin()),
            Box::new(std::io::stdout()),
        )
    }

    pub(crate) fn pipes(kind: &'static str, reader: ReadHalf, writer: WriteHalf) -> Self {
        Self {
            inner: IpcStreamInner::Pipes {
                kind,
                reader,
                writer,
            },
        }
    }

    /// Short transport name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix",
            IpcStreamInner::Pipes { kind, .. } => kind,
        }
    }

    /// Split into independently owned read and write halves.
    ///
    /// Socket streams are duplicated (a new file descriptor for the read
    /// half); pipe pairs are simply separated. Dropping a socket's write half
    /// shuts down the write direction so the peer sees EOF even while the
    /// read half is still open.
    pub fn into_split(self) -> Result<(ReadHalf, WriteHalf)> {
        match self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let reader = stream.try_clone()?;
                Ok((Box::new(reader), Box::new(UnixWriteHalf(stream))))
            }
            IpcStreamInner::Pipes { reader, writer, .. } => Ok((reader, writer)),
        }
    }

    /// Get the credentials of the connected peer (Linux sockets only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
            IpcStreamInner::Pipes { .. } => return None,
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

#[cfg(unix)]
struct UnixWriteHalf(std::os::unix::net::UnixStream);

#[cfg(unix)]
impl Write for UnixWriteHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

#[cfg(unix)]
impl Drop for UnixWriteHalf {
    fn drop(&mut self) {
        let _ = self.0.shutdown(std::net::Shutdown::Write);
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.kind())
            .finish()
    }
}
