//! Per-file stability scheduler.
//!
//! Turns a stream of create/modify events into at most one upload (or update) per
//! burst of activity, and removes the local copy once it has stayed untouched for the
//! delete delay after a successful sync.
//!
//! Debouncing is lazy: an armed check is never cancelled when the file is touched
//! again. When it fires it compares the current time with the latest recorded
//! activity and, if the file is still busy, re-arms itself for the *full* interval.
//! Under continuous light modification this bounds upload latency at roughly twice
//! the upload delay, and keeps `record_activity` down to one short critical section.
//!
//! Both delays are measured against the same `last_activity` timestamp.

use crate::core::clock::StabilityClock;
use crate::core::record_store::{FileRecord, FileRecordStore};
use crate::core::router::RoutedEvent;
use crate::fs::ActivityKind;
use crate::global_var::LOGGER;
use crate::network::RemoteSync;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Quiet time required before a file is uploaded or updated.
    pub upload_debounce: Duration,
    /// Quiet time required after a sync before the local copy is deleted.
    pub delete_debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            upload_debounce: Duration::from_secs(crate::config::DEFAULT_UPLOAD_DELAY_SECONDS),
            delete_debounce: Duration::from_secs(crate::config::DEFAULT_DELETE_DELAY_SECONDS),
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    store: FileRecordStore,
    clock: Arc<dyn StabilityClock>,
    remote: Arc<dyn RemoteSync>,
}

enum LocalDelete {
    Deleted,
    AlreadyGone,
    Postponed,
    Failed(io::Error),
}

/// Cloneable handle; all clones share one record store.
#[derive(Clone)]
pub struct StabilityScheduler {
    inner: Arc<SchedulerInner>,
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

impl StabilityScheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn StabilityClock>,
        remote: Arc<dyn RemoteSync>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                store: FileRecordStore::new(),
                clock,
                remote,
            }),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    pub fn store(&self) -> &FileRecordStore {
        &self.inner.store
    }

    pub fn record(&self, path: &Path) -> Option<FileRecord> {
        self.inner.store.get(path)
    }

    pub fn on_event(&self, event: &RoutedEvent) {
        self.record_activity(event.kind, &event.path, &event.remote_dir);
    }

    /// Note activity on `path` and make sure an upload check is armed for it.
    ///
    /// Events for paths that are already gone are ignored.
    pub fn record_activity(&self, kind: ActivityKind, path: &Path, remote_dir: &str) {
        // one stat call; ingestion stays synchronous so callers never await here
        if !path.exists() {
            LOGGER.debug(format!(
                "[scheduler] ignoring {:?} for vanished {}",
                kind,
                path.display()
            ));
            return;
        }

        let now = self.inner.clock.now();
        let arm = self
            .inner
            .store
            .upsert_with(path, remote_dir, now, |record, created| {
                record.touch(now);
                if created {
                    LOGGER.debug(format!("[scheduler] tracking {}", path.display()));
                }
                record.try_arm_upload()
            });

        if arm {
            LOGGER.trace(format!(
                "[scheduler] {:?} {}: upload check armed",
                kind,
                path.display()
            ));
            self.arm_upload_check(path.to_path_buf());
        }
    }

    fn arm_upload_check(&self, path: PathBuf) {
        let this = self.clone();
        self.inner.clock.after(
            self.inner.config.upload_debounce,
            Box::pin(async move { this.on_upload_check(path).await }),
        );
    }

    fn arm_delete_check(&self, path: PathBuf, epoch: u64) {
        let this = self.clone();
        self.inner.clock.after(
            self.inner.config.delete_debounce,
            Box::pin(async move { this.on_delete_check(path, epoch).await }),
        );
    }

    fn quiet_for(&self, record: &FileRecord, window: Duration) -> bool {
        self.inner
            .clock
            .now()
            .saturating_duration_since(record.last_activity())
            >= window
    }

    /// Clear the upload slot after a check finished, unless activity arrived while
    /// the check was busy with I/O; then keep the slot and arm a fresh check so the
    /// newer content is picked up. Also arms a delete check for `delete_epoch`.
    fn finish_upload_check(&self, path: &Path, observed: Instant, delete_epoch: Option<u64>) {
        let rearm = self
            .inner
            .store
            .update(path, |record| {
                if record.last_activity() > observed {
                    true
                } else {
                    record.disarm_upload();
                    false
                }
            })
            .unwrap_or(false);

        if let Some(epoch) = delete_epoch {
            self.arm_delete_check(path.to_path_buf(), epoch);
        }
        if rearm {
            LOGGER.debug(format!(
                "[scheduler] {} changed during sync; checking again",
                path.display()
            ));
            self.arm_upload_check(path.to_path_buf());
        }
    }

    async fn on_upload_check(&self, path: PathBuf) {
        let Some(op_lock) = self.inner.store.op_lock(&path) else {
            return;
        };
        let _serial = op_lock.lock().await;

        let Some(snapshot) = self.inner.store.get(&path) else {
            return;
        };

        if !self.quiet_for(&snapshot, self.inner.config.upload_debounce) {
            LOGGER.trace(format!(
                "[scheduler] {} still changing; upload check re-armed",
                path.display()
            ));
            self.arm_upload_check(path);
            return;
        }

        let observed = snapshot.last_activity();
        if !file_exists(&path).await {
            LOGGER.debug(format!(
                "[scheduler] {} vanished before upload",
                path.display()
            ));
            self.finish_upload_check(&path, observed, None);
            return;
        }

        let destination = snapshot.remote_destination().to_string();
        let delete_epoch = match snapshot.remote_name() {
            None => match self.inner.remote.create(&path, &destination).await {
                Ok(remote_name) => self
                    .inner
                    .store
                    .update(&path, |record| {
                        record.assign_remote_name(remote_name)?;
                        Ok::<u64, crate::err::Error>(record.arm_delete())
                    })
                    .and_then(|res| match res {
                        Ok(epoch) => Some(epoch),
                        Err(e) => {
                            LOGGER.error(format!("[scheduler] {}", e));
                            None
                        }
                    }),
                Err(e) => {
                    LOGGER.error(format!(
                        "Failed to upload {} to {}: {}",
                        path.display(),
                        destination,
                        e
                    ));
                    None
                }
            },
            Some(remote_name) => {
                if let Err(e) = self
                    .inner
                    .remote
                    .replace(&path, remote_name, &destination)
                    .await
                {
                    LOGGER.error(format!(
                        "Failed to update {} as {} in {}: {}",
                        path.display(),
                        remote_name,
                        destination,
                        e
                    ));
                }
                self.inner.store.update(&path, |record| record.arm_delete())
            }
        };

        self.finish_upload_check(&path, observed, delete_epoch);
    }

    async fn on_delete_check(&self, path: PathBuf, epoch: u64) {
        let Some(op_lock) = self.inner.store.op_lock(&path) else {
            return;
        };
        let _serial = op_lock.lock().await;

        let Some(snapshot) = self.inner.store.get(&path) else {
            return;
        };
        if snapshot.delete_epoch() != epoch || !snapshot.delete_armed() {
            LOGGER.trace(format!(
                "[scheduler] delete check {} for {} superseded",
                epoch,
                path.display()
            ));
            return;
        }
        if snapshot.remote_name().is_none() {
            return;
        }

        if snapshot.upload_armed()
            || !self.quiet_for(&snapshot, self.inner.config.delete_debounce)
        {
            LOGGER.trace(format!(
                "[scheduler] {} not settled; delete check re-armed",
                path.display()
            ));
            self.arm_delete_check(path, epoch);
            return;
        }

        let observed = snapshot.last_activity();
        // unlink inside the store's critical section: `record_activity` lands either
        // before it (delete postponed) or after it (path gone, event ignored)
        let outcome = self.inner.store.remove_when(&path, |record| {
            if record.last_activity() != observed || record.upload_armed() {
                return (false, LocalDelete::Postponed);
            }
            match std::fs::remove_file(&path) {
                Ok(()) => (true, LocalDelete::Deleted),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    (true, LocalDelete::AlreadyGone)
                }
                Err(e) => {
                    record.disarm_delete();
                    (false, LocalDelete::Failed(e))
                }
            }
        });

        match outcome {
            None => {}
            Some(LocalDelete::Deleted) => {
                LOGGER.info(format!(
                    "Deleted local file {} after successful upload",
                    path.display()
                ));
            }
            Some(LocalDelete::AlreadyGone) => {
                LOGGER.debug(format!(
                    "[scheduler] {} already gone; forgetting it",
                    path.display()
                ));
            }
            Some(LocalDelete::Postponed) => {
                LOGGER.trace(format!(
                    "[scheduler] {} touched during delete check; re-armed",
                    path.display()
                ));
                self.arm_delete_check(path, epoch);
            }
            Some(LocalDelete::Failed(e)) => {
                LOGGER.error(format!(
                    "Failed to delete local file {}: {}",
                    path.display(),
                    e
                ));
            }
        }
    }
}
