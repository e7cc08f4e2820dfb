use crate::err::Result;
use async_trait::async_trait;
use std::path::Path;

/// The remote store the scheduler pushes settled files to.
///
/// Implementations must be safe to call concurrently for different paths. Errors are
/// opaque to the caller: they are logged and never retried automatically.
#[async_trait]
pub trait RemoteSync: Send + Sync + 'static {
    /// Upload `local_path` as a new file inside `remote_dir` and return the name it
    /// was stored under. The name may differ from the local file name when the
    /// remote folder already holds a file with that name.
    async fn create(&self, local_path: &Path, remote_dir: &str) -> Result<String>;

    /// Overwrite the content of `remote_dir/remote_name` with `local_path`.
    async fn replace(&self, local_path: &Path, remote_name: &str, remote_dir: &str) -> Result<()>;
}
