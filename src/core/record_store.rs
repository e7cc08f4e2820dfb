use crate::err::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::Mutex as TokioMutex;

/// Lifecycle position of a tracked file, derived from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// An upload check is armed.
    PendingUpload,
    /// Never uploaded and nothing armed: the upload failed or the file vanished.
    /// Waits for the next activity event.
    Unsynced,
    /// Uploaded, nothing armed.
    Synced,
    /// Uploaded and a deletion check is outstanding.
    PendingDelete,
}

/// Everything the scheduler knows about one local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    path: PathBuf,
    last_activity: Instant,
    remote_name: Option<String>,
    remote_destination: String,
    upload_armed: bool,
    delete_armed: bool,
    delete_epoch: u64,
}

impl FileRecord {
    fn new(path: PathBuf, remote_destination: String, now: Instant) -> Self {
        Self {
            path,
            last_activity: now,
            remote_name: None,
            remote_destination,
            upload_armed: false,
            delete_armed: false,
            delete_epoch: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub fn remote_destination(&self) -> &str {
        &self.remote_destination
    }

    pub fn upload_armed(&self) -> bool {
        self.upload_armed
    }

    pub fn delete_armed(&self) -> bool {
        self.delete_armed
    }

    pub fn delete_epoch(&self) -> u64 {
        self.delete_epoch
    }

    pub fn state(&self) -> FileState {
        match (self.upload_armed, &self.remote_name, self.delete_armed) {
            (true, _, _) => FileState::PendingUpload,
            (false, None, _) => FileState::Unsynced,
            (false, Some(_), true) => FileState::PendingDelete,
            (false, Some(_), false) => FileState::Synced,
        }
    }

    /// Record activity at `at`. Older timestamps never move the clock backwards.
    pub fn touch(&mut self, at: Instant) {
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    /// Claim the single upload-check slot. Returns false if a check is already armed.
    pub fn try_arm_upload(&mut self) -> bool {
        if self.upload_armed {
            return false;
        }
        self.upload_armed = true;
        true
    }

    pub fn disarm_upload(&mut self) {
        self.upload_armed = false;
    }

    /// Set the remote name after the first upload. The name can be set once; setting
    /// the same name again is a no-op and a different name is an error.
    pub fn assign_remote_name(&mut self, name: String) -> Result<()> {
        match &self.remote_name {
            None => {
                self.remote_name = Some(name);
                Ok(())
            }
            Some(existing) if *existing == name => Ok(()),
            Some(existing) => Err(format!(
                "{} is already synced as '{}', refusing to rename it to '{}'",
                self.path.display(),
                existing,
                name
            )
            .into()),
        }
    }

    /// Start a new deletion-check generation and return its epoch. Checks from older
    /// generations become no-ops.
    pub fn arm_delete(&mut self) -> u64 {
        self.delete_epoch += 1;
        self.delete_armed = true;
        self.delete_epoch
    }

    /// End the current deletion generation without deleting (e.g. the delete failed).
    pub fn disarm_delete(&mut self) {
        self.delete_armed = false;
    }
}

struct Slot {
    record: FileRecord,
    // held by timer callbacks across check -> remote I/O -> write-back
    op_lock: Arc<TokioMutex<()>>,
}

/// In-memory map of tracked paths, guarded by one lock.
///
/// Every accessor takes the lock for the duration of a single call and hands out
/// copies, so no caller can hold a live reference to a record across an await.
#[derive(Default)]
pub struct FileRecordStore {
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl FileRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot>> {
        // closures run under the lock only touch plain fields; a panic cannot leave a record half-written
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create-or-fetch the record for `path`.
    pub fn upsert(&self, path: &Path, destination: &str, now: Instant) -> FileRecord {
        self.upsert_with(path, destination, now, |record, _| record.clone())
    }

    /// Create-or-fetch the record for `path` and apply `f` to it in the same critical
    /// section. `f` is told whether the record was just created.
    pub fn upsert_with<R>(
        &self,
        path: &Path,
        destination: &str,
        now: Instant,
        f: impl FnOnce(&mut FileRecord, bool) -> R,
    ) -> R {
        let mut slots = self.slots();
        let mut created = false;
        let slot = slots.entry(path.to_path_buf()).or_insert_with(|| {
            created = true;
            Slot {
                record: FileRecord::new(path.to_path_buf(), destination.to_string(), now),
                op_lock: Arc::new(TokioMutex::new(())),
            }
        });
        f(&mut slot.record, created)
    }

    pub fn get(&self, path: &Path) -> Option<FileRecord> {
        self.slots().get(path).map(|slot| slot.record.clone())
    }

    /// Apply `f` to an existing record atomically. Returns `None` if the path is not tracked.
    pub fn update<R>(&self, path: &Path, f: impl FnOnce(&mut FileRecord) -> R) -> Option<R> {
        self.slots().get_mut(path).map(|slot| f(&mut slot.record))
    }

    pub fn remove(&self, path: &Path) -> Option<FileRecord> {
        self.slots().remove(path).map(|slot| slot.record)
    }

    /// Run `f` on the record under the store lock and drop the record when `f`
    /// returns `true` alongside its result. Returns `None` if the path is not tracked.
    pub fn remove_when<R>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut FileRecord) -> (bool, R),
    ) -> Option<R> {
        let mut slots = self.slots();
        let slot = slots.get_mut(path)?;
        let (remove, result) = f(&mut slot.record);
        if remove {
            slots.remove(path);
        }
        Some(result)
    }

    /// The per-path operation lock, if the path is tracked.
    pub fn op_lock(&self, path: &Path) -> Option<Arc<TokioMutex<()>>> {
        self.slots().get(path).map(|slot| slot.op_lock.clone())
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.slots().keys().cloned().collect()
    }
}
