use crate::global_var::LOGGER;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Owns a directory tree and removes it on drop, even when a test panics midway.
#[derive(Debug)]
pub struct TmpDirGuard(pub PathBuf);

impl TmpDirGuard {
    /// Create a fresh, uniquely named directory under the system temp dir.
    pub fn new(prefix: &str) -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut p = std::env::temp_dir();
        p.push(format!("{}_{}_{}", prefix, std::process::id(), nanos));
        // a failure here surfaces as soon as the caller touches the path
        let _ = std::fs::create_dir_all(&p);
        Self(p)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TmpDirGuard {
    fn drop(&mut self) {
        LOGGER.trace(format!(
            "TmpDirGuard dropping, removing temporary directory: {:?}",
            &self.0
        ));
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

impl From<PathBuf> for TmpDirGuard {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl AsRef<Path> for TmpDirGuard {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

impl Deref for TmpDirGuard {
    type Target = PathBuf;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
