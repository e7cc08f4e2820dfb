use crate::fs::{ActivityKind, RawFsEvent};
use crate::global_var::LOGGER;
use std::path::{Path, PathBuf};

/// A watched local tree and the remote folder its files are uploaded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchMapping {
    local_root: PathBuf,
    remote_dir: String,
}

impl WatchMapping {
    pub fn new(local_root: impl Into<PathBuf>, remote_dir: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_dir: remote_dir.into(),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_dir(&self) -> &str {
        &self.remote_dir
    }

    pub fn contains(&self, path: &Path) -> bool {
        // component-wise: /data/a does not contain /data/ab
        path.starts_with(&self.local_root)
    }
}

/// An event that survived routing and is ready for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedEvent {
    pub kind: ActivityKind,
    pub path: PathBuf,
    pub remote_dir: String,
}

/// Maps raw filesystem events to the remote folder of the root they belong to.
///
/// Roots are expected not to overlap (config validation rejects nested roots); the
/// first mapping containing a path wins.
#[derive(Debug, Clone)]
pub struct EventRouter {
    mappings: Vec<WatchMapping>,
}

impl EventRouter {
    pub fn new(mappings: Vec<WatchMapping>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &[WatchMapping] {
        &self.mappings
    }

    pub fn route(&self, event: &RawFsEvent) -> Option<RoutedEvent> {
        if event.is_dir {
            LOGGER.trace(format!("[router] skipping directory {}", event.path.display()));
            return None;
        }
        match self.mappings.iter().find(|m| m.contains(&event.path)) {
            Some(mapping) => Some(RoutedEvent {
                kind: event.kind,
                path: event.path.clone(),
                remote_dir: mapping.remote_dir.clone(),
            }),
            None => {
                LOGGER.debug(format!(
                    "[router] {} is outside every watched directory; dropped",
                    event.path.display()
                ));
                None
            }
        }
    }
}
