use crate::err::Result;
use crate::global_var::LOGGER;
use notify::event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver};

const EVENT_CHANNEL_BOUND: usize = 1024;

/// What happened to a file, as far as the upload lifecycle cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Created,
    Modified,
}

/// A single change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: ActivityKind,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Decides which file names never reach the scheduler.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    ignore: Vec<Regex>,
}

impl EventFilter {
    pub fn new(ignore: Vec<Regex>) -> Self {
        Self { ignore }
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        if lower == ".ds_store" || lower == "desktop.ini" || lower == "thumbs.db" {
            return true;
        }
        if name.starts_with(super::util::PERM_PROBE_PREFIX) {
            return true;
        }
        self.ignore.iter().any(|re| re.is_match(name))
    }

    fn is_ignored_path(&self, path: &Path) -> bool {
        match path.file_name().and_then(|s| s.to_str()) {
            Some(name) => self.is_ignored_name(name),
            None => false,
        }
    }
}

/// Watches a set of directory trees and forwards file activity as [`RawFsEvent`]s.
///
/// Keep the listener alive while reading from the receiver; dropping it stops the
/// OS watches and closes the channel.
pub struct FsListener {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FsListener {
    pub fn watch<P: AsRef<Path>>(
        roots: &[P],
        filter: EventFilter,
    ) -> Result<(Self, Receiver<RawFsEvent>)> {
        let roots: Vec<PathBuf> = roots.iter().map(|r| r.as_ref().to_path_buf()).collect();
        if roots.is_empty() {
            return Err("No directories to watch".into());
        }
        for root in &roots {
            if !root.exists() {
                return Err(format!("Path '{}' does not exist", root.display()).into());
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BOUND);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(ev) => {
                    for raw in filter_event(ev, &filter) {
                        // receiver gone means we are shutting down
                        if tx.blocking_send(raw).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    LOGGER.error(format!("Filesystem watcher error: {}", e));
                }
            },
            Config::default()
                .with_poll_interval(Duration::from_secs(5))
                .with_follow_symlinks(false),
        )?;

        for root in &roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            LOGGER.info(format!("Start watching {}", root.display()));
        }

        Ok((
            Self {
                _watcher: watcher,
                roots,
            },
            rx,
        ))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

fn classify(kind: &EventKind) -> Option<ActivityKind> {
    match kind {
        EventKind::Create(_) => Some(ActivityKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            Some(ActivityKind::Created)
        }
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => Some(ActivityKind::Modified),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(ActivityKind::Modified),
        _ => None,
    }
}

pub(crate) fn filter_event(ev: Event, filter: &EventFilter) -> Vec<RawFsEvent> {
    let Some(kind) = classify(&ev.kind) else {
        return Vec::new();
    };

    let paths = match ev.kind {
        // [from, to]: only the destination is new content
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            ev.paths.into_iter().last().into_iter().collect()
        }
        _ => ev.paths,
    };

    paths
        .into_iter()
        .filter(|p| !filter.is_ignored_path(p))
        .map(|path| {
            let is_dir = match ev.kind {
                EventKind::Create(CreateKind::Folder) => true,
                EventKind::Create(CreateKind::File) => false,
                _ => path.is_dir(),
            };
            RawFsEvent { kind, path, is_dir }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utilities::TmpDirGuard;
    use notify::event::{DataChange, RemoveKind};
    use std::fs;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |ev, p| ev.add_path(PathBuf::from(p)))
    }

    #[test]
    fn create_and_modify_events_are_classified() {
        let filter = EventFilter::default();
        let created = filter_event(
            event(EventKind::Create(CreateKind::File), &["/w/a.txt"]),
            &filter,
        );
        assert_eq!(
            created,
            vec![RawFsEvent {
                kind: ActivityKind::Created,
                path: PathBuf::from("/w/a.txt"),
                is_dir: false,
            }]
        );

        let modified = filter_event(
            event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/w/a.txt"],
            ),
            &filter,
        );
        assert_eq!(modified[0].kind, ActivityKind::Modified);

        let closed = filter_event(
            event(
                EventKind::Access(AccessKind::Close(AccessMode::Write)),
                &["/w/a.txt"],
            ),
            &filter,
        );
        assert_eq!(closed[0].kind, ActivityKind::Modified);
    }

    #[test]
    fn removals_and_reads_are_dropped() {
        let filter = EventFilter::default();
        assert!(
            filter_event(
                event(EventKind::Remove(RemoveKind::File), &["/w/a.txt"]),
                &filter
            )
            .is_empty()
        );
        assert!(
            filter_event(
                event(
                    EventKind::Access(AccessKind::Close(AccessMode::Read)),
                    &["/w/a.txt"]
                ),
                &filter
            )
            .is_empty()
        );
        assert!(
            filter_event(
                event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                    &["/w/a.txt"]
                ),
                &filter
            )
            .is_empty()
        );
    }

    #[test]
    fn rename_reports_destination_as_created() {
        let out = filter_event(
            event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/w/a.part", "/w/a.pdf"],
            ),
            &EventFilter::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, PathBuf::from("/w/a.pdf"));
        assert_eq!(out[0].kind, ActivityKind::Created);
    }

    #[test]
    fn folder_creation_is_flagged_as_directory() {
        let out = filter_event(
            event(EventKind::Create(CreateKind::Folder), &["/w/sub"]),
            &EventFilter::default(),
        );
        assert!(out[0].is_dir);
    }

    #[test]
    fn ignored_names_are_filtered() {
        let filter = EventFilter::new(vec![Regex::new(r"\.swp$").unwrap()]);
        assert!(filter.is_ignored_name(".DS_Store"));
        assert!(filter.is_ignored_name("Thumbs.db"));
        assert!(filter.is_ignored_name(".perm_check_1_2.tmp"));
        assert!(filter.is_ignored_name(".notes.txt.swp"));
        assert!(!filter.is_ignored_name("notes.txt"));

        let out = filter_event(
            event(
                EventKind::Create(CreateKind::File),
                &["/w/.notes.txt.swp", "/w/notes.txt"],
            ),
            &filter,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, PathBuf::from("/w/notes.txt"));
    }

    #[test]
    fn watch_nonexistent_path_errors() {
        let tmp = TmpDirGuard::new("fs_watch_missing");
        let missing = tmp.join("subdir_that_does_not_exist");
        assert!(FsListener::watch(&[missing], EventFilter::default()).is_err());
        let none: [PathBuf; 0] = [];
        assert!(FsListener::watch(&none, EventFilter::default()).is_err());
    }

    #[tokio::test]
    async fn watch_dir_receives_create_event() {
        let tmp = TmpDirGuard::new("fs_watch_create");
        let root = fs::canonicalize(tmp.path()).unwrap();

        let (listener, mut rx) =
            FsListener::watch(&[root.clone()], EventFilter::default()).expect("watcher");
        assert_eq!(listener.roots(), &[root.clone()]);

        let file_path = root.join("hello.txt");
        fs::write(&file_path, b"hello").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(ev) = rx.recv().await {
                if ev.path == file_path {
                    return Some(ev);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();

        let ev = got.expect("expected an event for the created file");
        assert!(!ev.is_dir);
    }
}
