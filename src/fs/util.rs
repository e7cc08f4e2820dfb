//! Filesystem helpers.
//!
//! Directory permission probing works by attempting the real operations rather than
//! reading mode bits:
//! - read: list entries (`read_dir`)
//! - write: create and remove a uniquely named probe file
//! - execute: canonicalize the path, which needs traverse rights on every component

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of the probe files created by [`check_dir_permissions`].
pub const PERM_PROBE_PREFIX: &str = ".perm_check_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirPermissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl DirPermissions {
    pub const fn none() -> Self {
        Self {
            read: false,
            write: false,
            execute: false,
        }
    }

    /// Enough to watch the tree and read files for upload.
    pub fn can_watch(&self) -> bool {
        self.read && self.execute
    }
}

pub fn check_dir_permissions<P: AsRef<Path>>(dir: P) -> DirPermissions {
    let dir = dir.as_ref();

    match fs::metadata(dir) {
        Ok(md) if md.is_dir() => {}
        _ => return DirPermissions::none(),
    }

    DirPermissions {
        read: fs::read_dir(dir).is_ok(),
        write: try_create_ephemeral_file(dir).unwrap_or(false),
        execute: fs::canonicalize(dir).is_ok(),
    }
}

fn try_create_ephemeral_file(dir: &Path) -> io::Result<bool> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let path: PathBuf = dir.join(format!(
        "{}{}_{}.tmp",
        PERM_PROBE_PREFIX,
        std::process::id(),
        millis
    ));

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => {
            drop(file);
            let _ = fs::remove_file(&path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let alt = path.with_extension("alt.tmp");
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&alt)
            {
                Ok(f2) => {
                    drop(f2);
                    let _ = fs::remove_file(&alt);
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }
        Err(_) => Ok(false),
    }
}

/// Expand a leading `~/` (or a bare `~`) to `$HOME`. Other paths are returned as-is.
pub fn expand_tilde(path: &str) -> String {
    let home = match std::env::var("HOME") {
        Ok(home) => home,
        Err(_) => return path.to_string(),
    };
    if path == "~" {
        return home;
    }
    match path.strip_prefix("~/") {
        Some(rest) => format!("{}/{}", home.trim_end_matches('/'), rest),
        None => path.to_string(),
    }
}

/// Make `path` absolute against the current directory and fold `.` and `..`
/// components lexically. Symlinks are not resolved.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
