//! Time source and one-shot delayed callbacks for the stability scheduler.
//!
//! Checks are never cancelled when a file is touched again; a stale check simply
//! re-reads the record when it fires and decides from the latest activity time.
//! Implementations therefore only need "run this once, roughly after `delay`".

use crate::global_var::LOGGER;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// A callback armed on a clock.
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait StabilityClock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Run `task` once, after `delay`. Tasks may run concurrently with each other.
    fn after(&self, delay: Duration, task: TimerTask);
}

/// Wall-clock implementation: one tokio task per armed timer.
#[derive(Debug)]
pub struct TokioClock {
    timers: Mutex<JoinSet<()>>,
    closed_tx: watch::Sender<bool>,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            timers: Mutex::new(JoinSet::new()),
            closed_tx,
        }
    }

    fn timers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.timers.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Timers that are sleeping or running right now.
    pub fn outstanding(&self) -> usize {
        let mut timers = self.timers();
        while timers.try_join_next().is_some() {}
        timers.len()
    }

    /// Stop the clock.
    ///
    /// Timers still sleeping are cancelled and never fire. Callbacks already running
    /// get up to `grace` to finish; whatever is left after that is aborted. Calls to
    /// `after` made from here on are dropped.
    pub async fn shutdown(&self, grace: Duration) {
        self.closed_tx.send_replace(true);
        let mut timers = std::mem::take(&mut *self.timers());
        let drained = tokio::time::timeout(grace, async {
            while timers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            LOGGER.warn(format!(
                "{} timer callbacks still running after {:?}; aborting them",
                timers.len(),
                grace
            ));
            timers.shutdown().await;
        }
    }
}

impl StabilityClock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn after(&self, delay: Duration, task: TimerTask) {
        let mut closed_rx = self.closed_tx.subscribe();
        if *closed_rx.borrow_and_update() {
            LOGGER.debug("Clock is shut down; dropping timer");
            return;
        }
        let mut timers = self.timers();
        while timers.try_join_next().is_some() {}
        timers.spawn(async move {
            tokio::select! {
                biased;
                _ = closed_rx.changed() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
    }
}

struct PendingTimer {
    due: Duration,
    seq: u64,
    task: TimerTask,
}

struct ManualState {
    elapsed: Duration,
    next_seq: u64,
    pending: Vec<PendingTimer>,
}

/// Virtual clock for tests. Time only moves through [`ManualClock::advance`].
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                next_seq: 0,
                pending: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Virtual time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.state().elapsed
    }

    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Due times (relative to the clock origin) of all armed timers, earliest first.
    pub fn pending_due(&self) -> Vec<Duration> {
        let mut due: Vec<Duration> = self.state().pending.iter().map(|t| t.due).collect();
        due.sort();
        due
    }

    /// Move time forward by `by`, firing every timer that falls due on the way.
    ///
    /// Timers fire in due order (arming order on ties) and each callback runs to
    /// completion before the next one starts. Timers armed by a callback fire in the
    /// same call if they fall due before the target time.
    pub async fn advance(&self, by: Duration) {
        let target = self.state().elapsed + by;
        loop {
            let next = {
                let mut state = self.state();
                let idx = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);
                match idx {
                    Some(i) => {
                        let timer = state.pending.swap_remove(i);
                        state.elapsed = state.elapsed.max(timer.due);
                        timer.task
                    }
                    None => {
                        state.elapsed = target;
                        break;
                    }
                }
            };
            next.await;
        }
    }
}

impl StabilityClock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state().elapsed
    }

    fn after(&self, delay: Duration, task: TimerTask) {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.elapsed + delay;
        state.pending.push(PendingTimer { due, seq, task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn push_task(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> TimerTask {
        let log = log.clone();
        Box::pin(async move {
            log.lock().unwrap().push(name);
        })
    }

    #[tokio::test]
    async fn manual_clock_fires_in_due_order() {
        let clock = ManualClock::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        clock.after(Duration::from_secs(20), push_task(&log, "late"));
        clock.after(Duration::from_secs(10), push_task(&log, "early"));
        clock.after(Duration::from_secs(10), push_task(&log, "early-2"));
        assert_eq!(clock.pending(), 3);
        assert_eq!(
            clock.pending_due(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );

        clock.advance(Duration::from_secs(9)).await;
        assert!(log.lock().unwrap().is_empty());

        clock.advance(Duration::from_secs(1)).await;
        assert_eq!(*log.lock().unwrap(), vec!["early", "early-2"]);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(15)).await;
        assert_eq!(*log.lock().unwrap(), vec!["early", "early-2", "late"]);
        assert_eq!(clock.pending(), 0);
        assert_eq!(clock.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test]
    async fn manual_clock_runs_timers_armed_by_callbacks() {
        let clock = Arc::new(ManualClock::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let (c, f) = (clock.clone(), fired.clone());
        clock.after(
            Duration::from_secs(5),
            Box::pin(async move {
                f.fetch_add(1, Ordering::SeqCst);
                let f2 = f.clone();
                c.after(
                    Duration::from_secs(5),
                    Box::pin(async move {
                        f2.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        let start = clock.now();
        clock.advance(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(clock.now() - start, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn tokio_clock_fires_after_delay() {
        let clock = TokioClock::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        clock.after(
            Duration::from_millis(20),
            Box::pin(async move {
                let _ = tx.send(());
            }),
        );
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("timer should fire")
            .expect("sender kept");
        clock.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn tokio_clock_shutdown_cancels_sleeping_timers() {
        let clock = TokioClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        clock.after(
            Duration::from_secs(3600),
            Box::pin(async move {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(clock.outstanding(), 1);

        clock.shutdown(Duration::from_secs(1)).await;
        assert!(clock.is_closed());
        assert_eq!(clock.outstanding(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let f = fired.clone();
        clock.after(
            Duration::ZERO,
            Box::pin(async move {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tokio_clock_shutdown_waits_for_running_callback() {
        let clock = TokioClock::new();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        clock.after(
            Duration::ZERO,
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                d.fetch_add(1, Ordering::SeqCst);
            }),
        );
        // let the timer start its callback
        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.shutdown(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
