//! Change notification for tracked directories.
//!
//! A [`RemovalWatcher`] turns filesystem removals and renames into
//! [`RemovalEvent`]s on a bounded channel. A single [`StaleDebouncer`]
//! consumes that channel and emits one [`StaleSignal`] per burst, once the
//! burst has been quiet for the debounce window. Neither touches the
//! registry; whoever receives the signal decides to run a sync.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info},
};

use crate::types::Project;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// A directory entry disappeared or was renamed away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalEvent {
    pub path: PathBuf,
}

impl RemovalEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// "Tracked projects may be stale; run a sync." Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleSignal;

/// Directories to watch (non-recursively) so that removing or renaming any
/// tracked project, or any direct child of `root`, is observed.
pub fn watch_targets(root: Option<&Path>, tracked: &[Project]) -> Vec<PathBuf> {
    let mut targets: BTreeSet<PathBuf> = tracked
        .iter()
        .filter_map(|p| p.path.parent().map(Path::to_path_buf))
        .collect();
    if let Some(root) = root {
        targets.insert(root.to_path_buf());
    }
    targets.into_iter().collect()
}

/// Coalesces bursts of [`RemovalEvent`]s into single [`StaleSignal`]s.
#[derive(Debug, Clone, Copy)]
pub struct StaleDebouncer {
    quiet: Duration,
}

impl Default for StaleDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl StaleDebouncer {
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self { quiet }
    }

    /// Consume `events` on a background task. The returned receiver yields
    /// at most one pending signal at a time and closes once `events` is
    /// closed and drained.
    pub fn spawn(
        self,
        events: mpsc::Receiver<RemovalEvent>,
    ) -> (JoinHandle<()>, mpsc::Receiver<StaleSignal>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(events, tx));
        (handle, rx)
    }

    async fn run(self, mut events: mpsc::Receiver<RemovalEvent>, out: mpsc::Sender<StaleSignal>) {
        while let Some(first) = events.recv().await {
            debug!(path = %first.path.display(), "removal observed");
            let mut burst = 1usize;
            let mut closed = false;
            loop {
                match tokio::time::timeout(self.quiet, events.recv()).await {
                    Ok(Some(_)) => burst += 1,
                    Ok(None) => {
                        closed = true;
                        break;
                    },
                    Err(_) => break,
                }
            }

            info!(events = burst, "tracked projects may be stale");
            match out.try_send(StaleSignal) {
                // A signal is already pending; the receiver will sync anyway.
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {},
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
            if closed {
                return;
            }
        }
    }
}

#[cfg(feature = "file-watcher")]
pub use fs_watch::RemovalWatcher;

#[cfg(feature = "file-watcher")]
mod fs_watch {
    use std::{path::PathBuf, time::Duration};

    use {
        notify_debouncer_full::{
            DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
            notify::{EventKind, RecommendedWatcher, RecursiveMode, event::ModifyKind},
        },
        tokio::sync::mpsc,
        tracing::{debug, info, warn},
    };

    use {super::RemovalEvent, crate::error::Result};

    /// Raw event batching done by the notify debouncer before events reach
    /// the channel. The real quiet period lives in [`super::StaleDebouncer`].
    const TICK: Duration = Duration::from_millis(250);

    /// Removals and renames in either direction; a rename can carry a
    /// directory away from its tracked path.
    pub(super) fn is_removal(kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        )
    }

    /// Watches directories for removals and renames.
    pub struct RemovalWatcher {
        _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    }

    impl RemovalWatcher {
        /// Start watching `dirs` non-recursively, publishing onto `events`.
        ///
        /// The watcher must be kept alive (not dropped) for events to
        /// continue. When the channel is full, events are dropped: one
        /// pending event is enough to trigger a sync.
        pub fn start(dirs: Vec<PathBuf>, events: mpsc::Sender<RemovalEvent>) -> Result<Self> {
            let debouncer = new_debouncer(TICK, None, move |result: DebounceEventResult| {
                match result {
                    Ok(batch) => {
                        for event in batch {
                            if !is_removal(&event.kind) {
                                continue;
                            }
                            let Some(path) = event.paths.first() else {
                                continue;
                            };
                            debug!(path = %path.display(), kind = ?event.kind, "removal watcher event");
                            match events.try_send(RemovalEvent::new(path.clone())) {
                                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {},
                                Err(mpsc::error::TrySendError::Closed(_)) => return,
                            }
                        }
                    },
                    Err(errors) => {
                        for e in errors {
                            warn!(error = %e, "removal watcher error");
                        }
                    },
                }
            })?;

            let mut watcher = Self {
                _debouncer: debouncer,
            };

            for dir in &dirs {
                if dir.is_dir() {
                    watcher._debouncer.watch(dir, RecursiveMode::NonRecursive)?;
                    info!(dir = %dir.display(), "removal watcher: watching directory");
                }
            }

            Ok(watcher)
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::time::Instant};

    #[cfg(feature = "file-watcher")]
    use notify_debouncer_full::notify::{
        EventKind,
        event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode},
    };

    fn project_at(path: &str) -> Project {
        Project {
            id: path.into(),
            name: path.into(),
            path: path.into(),
            tags: Vec::new(),
            color: None,
            identity_key: None,
            sort_order: 0,
            is_archived: false,
            archived_at: None,
            created_at: 0,
        }
    }

    #[test]
    fn watch_targets_are_deduplicated_parents_and_root() {
        let tracked = [
            project_at("/home/u/code/a"),
            project_at("/home/u/code/b"),
            project_at("/home/u/code/group/c"),
        ];
        let targets = watch_targets(Some(Path::new("/home/u/code")), &tracked);
        assert_eq!(targets, vec![
            PathBuf::from("/home/u/code"),
            PathBuf::from("/home/u/code/group"),
        ]);
    }

    #[cfg(feature = "file-watcher")]
    #[rstest::rstest]
    #[case(EventKind::Remove(RemoveKind::Folder), true)]
    #[case(EventKind::Remove(RemoveKind::Any), true)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::From)), true)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), true)]
    #[case(EventKind::Create(CreateKind::Folder), false)]
    #[case(EventKind::Modify(ModifyKind::Data(DataChange::Content)), false)]
    #[case(EventKind::Access(AccessKind::Any), false)]
    fn only_removals_and_renames_are_forwarded(#[case] kind: EventKind, #[case] forwarded: bool) {
        assert_eq!(fs_watch::is_removal(&kind), forwarded);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_signal() {
        let (tx, rx) = mpsc::channel(16);
        let (handle, mut stale) = StaleDebouncer::default().spawn(rx);

        for i in 0..10 {
            tx.send(RemovalEvent::new(format!("/p/{i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let last_event = Instant::now();

        assert_eq!(stale.recv().await, Some(StaleSignal));
        assert!(last_event.elapsed() >= DEFAULT_DEBOUNCE - Duration::from_millis(100));

        drop(tx);
        handle.await.unwrap();
        assert_eq!(stale.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_signal_separately() {
        let (tx, rx) = mpsc::channel(16);
        let (_handle, mut stale) = StaleDebouncer::new(Duration::from_millis(500)).spawn(rx);

        tx.send(RemovalEvent::new("/p/a")).await.unwrap();
        assert_eq!(stale.recv().await, Some(StaleSignal));

        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(RemovalEvent::new("/p/b")).await.unwrap();
        assert_eq!(stale.recv().await, Some(StaleSignal));
    }

    #[tokio::test(start_paused = true)]
    async fn no_events_means_no_signal() {
        let (tx, rx) = mpsc::channel::<RemovalEvent>(16);
        let (handle, mut stale) = StaleDebouncer::default().spawn(rx);
        drop(tx);
        handle.await.unwrap();
        assert_eq!(stale.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_burst_is_flushed_on_close() {
        let (tx, rx) = mpsc::channel(16);
        let (handle, mut stale) = StaleDebouncer::default().spawn(rx);
        tx.send(RemovalEvent::new("/p/a")).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(stale.recv().await, Some(StaleSignal));
        assert_eq!(stale.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn unconsumed_signals_do_not_pile_up() {
        let (tx, rx) = mpsc::channel(16);
        let (_handle, mut stale) = StaleDebouncer::new(Duration::from_millis(200)).spawn(rx);
        for i in 0..3 {
            tx.send(RemovalEvent::new(format!("/p/{i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(stale.recv().await, Some(StaleSignal));
        assert!(stale.try_recv().is_err());
    }
}
