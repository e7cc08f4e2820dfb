pub mod clock;
pub mod record_store;
pub mod router;
pub mod scheduler;

pub use clock::{ManualClock, StabilityClock, TimerTask, TokioClock};
pub use record_store::{FileRecord, FileRecordStore, FileState};
pub use router::{EventRouter, RoutedEvent, WatchMapping};
pub use scheduler::{SchedulerConfig, StabilityScheduler};

use crate::fs::RawFsEvent;
use crate::global_var::LOGGER;
use tokio::sync::mpsc::Receiver;

/// Feed watcher events through the router into the scheduler until the watcher
/// channel closes (the listener was dropped). Returns the number of events routed.
pub async fn dispatch_events(
    mut rx: Receiver<RawFsEvent>,
    router: EventRouter,
    scheduler: StabilityScheduler,
) -> usize {
    let mut routed = 0usize;
    while let Some(raw) = rx.recv().await {
        if let Some(event) = router.route(&raw) {
            scheduler.on_event(&event);
            routed += 1;
        }
    }
    LOGGER.debug(format!(
        "Event channel closed after {} routed events",
        routed
    ));
    routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::Result;
    use crate::fs::ActivityKind;
    use crate::network::RemoteSync;
    use crate::utilities::TmpDirGuard;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;

    struct NoopRemote;

    #[async_trait]
    impl RemoteSync for NoopRemote {
        async fn create(&self, _: &Path, _: &str) -> Result<String> {
            Ok("x".into())
        }
        async fn replace(&self, _: &Path, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_file_events_until_channel_closes() {
        let tmp = TmpDirGuard::new("dispatch_events");
        let inside = tmp.join("a.txt");
        std::fs::write(&inside, b"1").unwrap();

        let router = EventRouter::new(vec![WatchMapping::new(tmp.path(), "/R")]);
        let clock = Arc::new(ManualClock::new());
        let scheduler =
            StabilityScheduler::new(SchedulerConfig::default(), clock.clone(), Arc::new(NoopRemote));

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(RawFsEvent {
            kind: ActivityKind::Created,
            path: inside.clone(),
            is_dir: false,
        })
        .await
        .unwrap();
        tx.send(RawFsEvent {
            kind: ActivityKind::Created,
            path: tmp.join("sub"),
            is_dir: true,
        })
        .await
        .unwrap();
        tx.send(RawFsEvent {
            kind: ActivityKind::Modified,
            path: "/outside/b.txt".into(),
            is_dir: false,
        })
        .await
        .unwrap();
        drop(tx);

        let routed = dispatch_events(rx, router, scheduler.clone()).await;
        assert_eq!(routed, 1);
        assert_eq!(scheduler.store().paths(), vec![inside.clone()]);
        assert_eq!(scheduler.record(&inside).unwrap().remote_destination(), "/R");
        assert_eq!(clock.pending(), 1);
    }
}
