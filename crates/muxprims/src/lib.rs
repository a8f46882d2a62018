//! Many independent byte streams over one duplex connection, and a remote
//! command proxy built on top.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex byte streams (Unix sockets, child stdio, own stdio)
//! - [`frame`]: control frame codec (OPEN, CLOSE, CLOSEACK, REQUEST, TRANSMIT)
//! - [`mux`]: credit-based channel multiplexer
//! - [`proxy`]: remote exec and file commands (behind `proxy` feature)

/// Re-export transport types.
pub mod transport {
    pub use muxprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use muxprims_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use muxprims_mux::*;
}

/// Re-export command proxy types (requires `proxy` feature).
#[cfg(feature = "proxy")]
pub mod proxy {
    pub use muxprims_proxy::*;
}
