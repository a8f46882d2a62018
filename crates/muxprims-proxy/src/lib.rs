//! Remote operations over a channel multiplexer.
//!
//! The client sends one command at a time on the command channel and reads
//! a single `PROTO_OK` / `PROTO_ERROR` reply. Bulk data for a command (a
//! directory listing, a file's bytes, a process's stdio) travels on
//! auxiliary channels the client opens before sending the command.
//!
//! - [`ProxyClient`]: the requesting side
//! - [`CommandServer`] / [`serve`]: the executing side

pub mod client;
pub mod command;
pub mod error;
mod exec;
pub mod fileinfo;
mod handlers;
pub mod process;
pub mod protocol;
pub mod server;
pub mod wire;

pub use client::{ExecRequest, ProxyClient, RemoteFile};
pub use command::{Command, ExecArgs};
pub use error::{ProxyError, Result};
pub use fileinfo::FileInfo;
pub use process::RemoteProcess;
pub use protocol::Opcode;
pub use server::{serve, CommandServer, Server, ServerConfig};
