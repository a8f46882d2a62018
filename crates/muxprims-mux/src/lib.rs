//! Channel multiplexing over one duplex byte stream.
//!
//! A [`Multiplexer`] carries up to 256 independent, bidirectional
//! [`Channel`]s. Each channel direction is flow controlled by credit: a
//! reader grants the peer room with REQUEST frames and the peer never sends
//! more TRANSMIT bytes than it was granted.
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use std::os::unix::net::UnixStream;
//!
//! use muxprims_mux::Multiplexer;
//!
//! let (left, right) = UnixStream::pair()?;
//! let local = Multiplexer::new(left.try_clone()?, left);
//! local.start()?;
//! # let _ = right;
//! let mut channel = local.open_channel()?;
//! channel.write_all(b"hello")?;
//! channel.flush()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod alloc;
pub mod channel;
pub mod config;
pub mod error;
pub mod listener;
pub mod multiplexer;

pub use alloc::IdAllocator;
pub use channel::{Channel, ChannelState};
pub use config::{MuxConfig, DEFAULT_CHANNEL_CAPACITY};
pub use error::{MuxError, Result};
pub use listener::ChannelListener;
pub use multiplexer::Multiplexer;

pub use muxprims_frame::MAX_CHANNELS;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if another thread panicked with it held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
