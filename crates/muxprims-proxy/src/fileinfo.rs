use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use bytes::BufMut;
use serde::Serialize;

use crate::error::Result;
use crate::wire::{WireRead, WireWrite};

/// File attributes as exchanged by FETCHINFO, CHILDINFOS and PUTINFO.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub exists: bool,
    pub directory: bool,
    pub symlink: bool,
    pub length: i64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    /// Unix mode bits (`0o7777` mask).
    pub permissions: i32,
    /// Target of a symbolic link, empty otherwise.
    pub link_target: String,
}

impl FileInfo {
    /// Describe `path`. Symbolic links report their target's attributes with
    /// `symlink` set. A missing path yields `exists == false`.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let Ok(link_meta) = std::fs::symlink_metadata(path) else {
            return Self {
                name,
                ..Self::default()
            };
        };

        let symlink = link_meta.file_type().is_symlink();
        let (meta, link_target) = if symlink {
            let target = std::fs::read_link(path)
                .map(|target| target.to_string_lossy().into_owned())
                .unwrap_or_default();
            (std::fs::metadata(path).unwrap_or(link_meta), target)
        } else {
            (link_meta, String::new())
        };

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_millis() as i64)
            .unwrap_or(0);

        Self {
            name,
            exists: true,
            directory: meta.is_dir(),
            symlink,
            length: meta.len() as i64,
            last_modified,
            permissions: mode_bits(&meta),
            link_target,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        buf.put_string(&self.name)?;
        buf.put_bool(self.exists);
        buf.put_bool(self.directory);
        buf.put_bool(self.symlink);
        buf.put_i64(self.length);
        buf.put_i64(self.last_modified);
        buf.put_i32(self.permissions);
        buf.put_string(&self.link_target)
    }

    pub fn decode(input: &mut impl Read) -> Result<Self> {
        Ok(Self {
            name: input.read_string()?,
            exists: input.read_bool()?,
            directory: input.read_bool()?,
            symlink: input.read_bool()?,
            length: input.read_i64()?,
            last_modified: input.read_i64()?,
            permissions: input.read_i32()?,
            link_target: input.read_string()?,
        })
    }
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    (meta.permissions().mode() & 0o7777) as i32
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> i32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
