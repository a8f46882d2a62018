//! Duplex byte stream sources for muxprims.
//!
//! The multiplexer needs exactly one thing from the outside world: a readable
//! half and a writable half of a single byte stream. This crate provides the
//! usual ways of getting one:
//! - the stdio pipes of a spawned child process (client side of a proxy)
//! - this process's own stdin/stdout (server side of a proxy)
//! - Unix domain sockets (Linux/macOS)
//!
//! Everything above this layer only sees [`IpcStream`] or its split halves.

pub mod child;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use child::ChildProcess;
pub use error::{Result, TransportError};
pub use traits::{IpcStream, ReadHalf, WriteHalf};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
