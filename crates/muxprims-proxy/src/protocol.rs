//! Envelope markers, command opcodes and option bits.

use crate::error::ProxyError;

/// Successful reply.
pub const PROTO_OK: u8 = 0;
/// A command follows: opcode (i16) then its arguments.
pub const PROTO_COMMAND: u8 = 1;
/// Stop the dispatcher.
pub const PROTO_SHUTDOWN: u8 = 2;
/// Failed reply, followed by a message string.
pub const PROTO_ERROR: u8 = 126;

/// Append to an existing file instead of truncating it (GETOUTPUTSTREAM).
pub const APPEND: i32 = 1;
/// Create only the last path component (MKDIR).
pub const SHALLOW: i32 = 4;
/// Apply `FileInfo::permissions` (PUTINFO).
pub const SET_ATTRIBUTES: i32 = 0x400;
/// Apply `FileInfo::last_modified` (PUTINFO).
pub const SET_LAST_MODIFIED: i32 = 0x800;

/// Command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Opcode {
    Exec = 1,
    GetCwd = 2,
    GetEnv = 3,
    GetProperties = 4,
    ChildInfos = 5,
    FetchInfo = 6,
    Mkdir = 7,
    Delete = 8,
    PutInfo = 9,
    GetInputStream = 10,
    GetOutputStream = 11,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Exec => "EXEC",
            Opcode::GetCwd => "GETCWD",
            Opcode::GetEnv => "GETENV",
            Opcode::GetProperties => "GETPROPERTIES",
            Opcode::ChildInfos => "CHILDINFOS",
            Opcode::FetchInfo => "FETCHINFO",
            Opcode::Mkdir => "MKDIR",
            Opcode::Delete => "DELETE",
            Opcode::PutInfo => "PUTINFO",
            Opcode::GetInputStream => "GETINPUTSTREAM",
            Opcode::GetOutputStream => "GETOUTPUTSTREAM",
        }
    }
}

impl TryFrom<i16> for Opcode {
    type Error = ProxyError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Opcode::Exec,
            2 => Opcode::GetCwd,
            3 => Opcode::GetEnv,
            4 => Opcode::GetProperties,
            5 => Opcode::ChildInfos,
            6 => Opcode::FetchInfo,
            7 => Opcode::Mkdir,
            8 => Opcode::Delete,
            9 => Opcode::PutInfo,
            10 => Opcode::GetInputStream,
            11 => Opcode::GetOutputStream,
            other => return Err(ProxyError::UnknownOpcode(other)),
        })
    }
}
