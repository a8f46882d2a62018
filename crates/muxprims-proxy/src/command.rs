use std::collections::BTreeMap;
use std::io::Read;

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::fileinfo::FileInfo;
use crate::protocol::{Opcode, PROTO_COMMAND};
use crate::wire::{WireRead, WireWrite};

/// Arguments of an EXEC command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecArgs {
    /// Channel A: stdin inbound, stdout outbound.
    pub stdio: u8,
    /// Channel B: stderr outbound.
    pub stderr: u8,
    /// Channel C: cancel byte inbound, exit code outbound.
    pub control: u8,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory; ignored unless absolute and existing.
    pub dir: String,
    /// Merge stderr into stdout.
    pub redirect: bool,
    /// Merge `env` into the server's environment instead of replacing it.
    pub append_env: bool,
}

/// A decoded command with its arguments.
///
/// `result` fields name the auxiliary channel the answer is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exec(ExecArgs),
    GetCwd { result: u8 },
    GetEnv { result: u8 },
    GetProperties { result: u8 },
    ChildInfos { result: u8, path: String },
    FetchInfo { result: u8, path: String },
    Mkdir { options: i32, path: String },
    Delete { options: i32, path: String },
    PutInfo { options: i32, path: String, info: FileInfo },
    GetInputStream { result: u8, options: i32, path: String },
    GetOutputStream { result: u8, options: i32, path: String },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Exec(_) => Opcode::Exec,
            Command::GetCwd { .. } => Opcode::GetCwd,
            Command::GetEnv { .. } => Opcode::GetEnv,
            Command::GetProperties { .. } => Opcode::GetProperties,
            Command::ChildInfos { .. } => Opcode::ChildInfos,
            Command::FetchInfo { .. } => Opcode::FetchInfo,
            Command::Mkdir { .. } => Opcode::Mkdir,
            Command::Delete { .. } => Opcode::Delete,
            Command::PutInfo { .. } => Opcode::PutInfo,
            Command::GetInputStream { .. } => Opcode::GetInputStream,
            Command::GetOutputStream { .. } => Opcode::GetOutputStream,
        }
    }

    /// Encode the full request: `PROTO_COMMAND`, opcode, arguments.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(PROTO_COMMAND);
        buf.put_i16(self.opcode() as i16);
        match self {
            Command::Exec(args) => {
                buf.put_u8(args.stdio);
                buf.put_u8(args.stderr);
                buf.put_u8(args.control);
                buf.put_strings(&args.argv)?;
                buf.put_map(&args.env)?;
                buf.put_string(&args.dir)?;
                buf.put_bool(args.redirect);
                buf.put_bool(args.append_env);
            }
            Command::GetCwd { result }
            | Command::GetEnv { result }
            | Command::GetProperties { result } => buf.put_u8(*result),
            Command::ChildInfos { result, path } | Command::FetchInfo { result, path } => {
                buf.put_u8(*result);
                buf.put_string(path)?;
            }
            Command::Mkdir { options, path } | Command::Delete { options, path } => {
                buf.put_i32(*options);
                buf.put_string(path)?;
            }
            Command::PutInfo {
                options,
                path,
                info,
            } => {
                buf.put_i32(*options);
                buf.put_string(path)?;
                info.encode(buf)?;
            }
            Command::GetInputStream {
                result,
                options,
                path,
            }
            | Command::GetOutputStream {
                result,
                options,
                path,
            } => {
                buf.put_u8(*result);
                buf.put_i32(*options);
                buf.put_string(path)?;
            }
        }
        Ok(())
    }

    /// Decode the arguments that follow `opcode` on the command channel.
    pub fn decode(opcode: Opcode, input: &mut impl Read) -> Result<Self> {
        let command = match opcode {
            Opcode::Exec => Command::Exec(ExecArgs {
                stdio: input.read_u8()?,
                stderr: input.read_u8()?,
                control: input.read_u8()?,
                argv: input.read_strings()?,
                env: input.read_map()?,
                dir: input.read_string()?,
                redirect: input.read_bool()?,
                append_env: input.read_bool()?,
            }),
            Opcode::GetCwd => Command::GetCwd {
                result: input.read_u8()?,
            },
            Opcode::GetEnv => Command::GetEnv {
                result: input.read_u8()?,
            },
            Opcode::GetProperties => Command::GetProperties {
                result: input.read_u8()?,
            },
            Opcode::ChildInfos => Command::ChildInfos {
                result: input.read_u8()?,
                path: input.read_string()?,
            },
            Opcode::FetchInfo => Command::FetchInfo {
                result: input.read_u8()?,
                path: input.read_string()?,
            },
            Opcode::Mkdir => Command::Mkdir {
                options: input.read_i32()?,
                path: input.read_string()?,
            },
            Opcode::Delete => Command::Delete {
                options: input.read_i32()?,
                path: input.read_string()?,
            },
            Opcode::PutInfo => Command::PutInfo {
                options: input.read_i32()?,
                path: input.read_string()?,
                info: FileInfo::decode(input)?,
            },
            Opcode::GetInputStream => Command::GetInputStream {
                result: input.read_u8()?,
                options: input.read_i32()?,
                path: input.read_string()?,
            },
            Opcode::GetOutputStream => Command::GetOutputStream {
                result: input.read_u8()?,
                options: input.read_i32()?,
                path: input.read_string()?,
            },
        };
        Ok(command)
    }
}
