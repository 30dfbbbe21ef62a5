//! File watcher module
//!
//! Coalesces raw change notifications into debounced per-manifest batches.
//! Each manifest gets its own debouncer task with two timers: a rest timer
//! that resets on every event (the normal flush path) and a cap timer that
//! flushes a batch at a maximum age, so a sustained change stream cannot
//! starve the build queue. Nothing is filtered semantically here; deciding
//! what is spurious is the reducer's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::prelude::*;
use crate::core::{Manifest, ManifestName};
use crate::engine::{Action, Dispatcher};

/// A single path-level change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
}

/// Stream of raw change notifications for a set of roots.
///
/// An `Err` item is a runtime watcher failure; the debouncer turns it into
/// a fatal `Action::Error`.
#[async_trait]
pub trait WatchSource: Send {
    async fn next_event(&mut self) -> Option<Result<FileEvent>>;
}

/// Constructor for watch sources; may fail (e.g. inotify limits)
pub type WatchSourceMaker = Arc<dyn Fn(&[PathBuf]) -> Result<Box<dyn WatchSource>> + Send + Sync>;

/// Watch source backed by the platform notify backend
struct NotifyWatchSource {
    rx: mpsc::UnboundedReceiver<Result<FileEvent>>,
    /// Keeps the backend watcher alive for the lifetime of the stream
    _watcher: notify::RecommendedWatcher,
}

#[async_trait]
impl WatchSource for NotifyWatchSource {
    async fn next_event(&mut self) -> Option<Result<FileEvent>> {
        self.rx.recv().await
    }
}

/// Build a `WatchSourceMaker` over the platform notify backend
pub fn notify_source_maker() -> WatchSourceMaker {
    Arc::new(|roots: &[PathBuf]| {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    for path in event.paths {
                        let _ = tx.send(Ok(FileEvent { path }));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(Error::watch(e.to_string())));
                }
            },
        )
        .map_err(|e| Error::watch(format!("Failed to create watcher: {}", e)))?;

        for root in roots {
            if root.exists() {
                watcher
                    .watch(root, RecursiveMode::Recursive)
                    .map_err(|e| Error::watch(format!("Failed to watch {}: {}", root.display(), e)))?;
                info!("Watching: {}", root.display());
            } else {
                warn!("Watch path does not exist: {}", root.display());
            }
        }

        Ok(Box::new(NotifyWatchSource { rx, _watcher: watcher }) as Box<dyn WatchSource>)
    })
}

/// Construct a source per manifest and spawn its debouncer task.
///
/// A construction failure is returned to the caller and aborts init.
pub fn spawn_manifest_watchers(
    manifests: &[Manifest],
    maker: &WatchSourceMaker,
    min_rest: Duration,
    max_batch: Duration,
    dispatcher: Dispatcher,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::with_capacity(manifests.len());

    for manifest in manifests {
        let source = maker(&manifest.watched_roots)?;
        tasks.push(tokio::spawn(debounce_loop(
            manifest.name.clone(),
            manifest.watched_roots.clone(),
            source,
            min_rest,
            max_batch,
            dispatcher.clone(),
            shutdown_rx.clone(),
        )));
    }

    Ok(tasks)
}

fn path_in_roots(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

fn flush(dispatcher: &Dispatcher, manifest_name: &ManifestName, pending: &mut Vec<PathBuf>) -> bool {
    let files = std::mem::take(pending);
    if files.is_empty() {
        return true;
    }
    dispatcher
        .dispatch(Action::ManifestFilesChanged {
            manifest_name: manifest_name.clone(),
            files,
        })
        .is_ok()
}

async fn debounce_loop(
    manifest_name: ManifestName,
    roots: Vec<PathBuf>,
    mut source: Box<dyn WatchSource>,
    min_rest: Duration,
    max_batch: Duration,
    dispatcher: Dispatcher,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut pending: Vec<PathBuf> = Vec::new();
    let mut rest_deadline: Option<Instant> = None;
    let mut cap_deadline: Option<Instant> = None;

    loop {
        // Idle arms sleep on a deadline far enough out to never fire
        let parked = Instant::now() + Duration::from_secs(24 * 60 * 60);
        let rest_at = rest_deadline.unwrap_or(parked);
        let cap_at = cap_deadline.unwrap_or(parked);

        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("File watcher for '{}' stopping", manifest_name);
                return;
            }
            event = source.next_event() => match event {
                None => {
                    flush(&dispatcher, &manifest_name, &mut pending);
                    debug!("Watch source for '{}' ended", manifest_name);
                    return;
                }
                Some(Err(e)) => {
                    let _ = dispatcher.dispatch(Action::Error { error: e });
                    return;
                }
                Some(Ok(FileEvent { path })) => {
                    if !path_in_roots(&path, &roots) {
                        continue;
                    }
                    let now = Instant::now();
                    if pending.is_empty() {
                        cap_deadline = Some(now + max_batch);
                    }
                    rest_deadline = Some(now + min_rest);
                    if !pending.contains(&path) {
                        pending.push(path);
                    }
                }
            },
            _ = tokio::time::sleep_until(rest_at), if rest_deadline.is_some() => {
                rest_deadline = None;
                cap_deadline = None;
                if !flush(&dispatcher, &manifest_name, &mut pending) {
                    return;
                }
            }
            _ = tokio::time::sleep_until(cap_at), if cap_deadline.is_some() => {
                rest_deadline = None;
                cap_deadline = None;
                if !flush(&dispatcher, &manifest_name, &mut pending) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ImageRef;
    use crate::engine::Store;

    struct ChannelWatchSource {
        rx: mpsc::UnboundedReceiver<Result<FileEvent>>,
    }

    #[async_trait]
    impl WatchSource for ChannelWatchSource {
        async fn next_event(&mut self) -> Option<Result<FileEvent>> {
            self.rx.recv().await
        }
    }

    fn test_manifest() -> Manifest {
        Manifest::new("api", ImageRef::new("registry.local/api"))
            .with_watched_roots(vec![PathBuf::from("/proj")])
    }

    struct WatcherFixture {
        store: Store,
        events: mpsc::UnboundedSender<Result<FileEvent>>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn start_watcher(min_rest: Duration, max_batch: Duration) -> WatcherFixture {
        let store = Store::new();
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manifest = test_manifest();
        tokio::spawn(debounce_loop(
            manifest.name.clone(),
            manifest.watched_roots.clone(),
            Box::new(ChannelWatchSource { rx }),
            min_rest,
            max_batch,
            store.dispatcher(),
            shutdown_rx,
        ));

        WatcherFixture {
            store,
            events,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn send(fixture: &WatcherFixture, path: &str) {
        fixture
            .events
            .send(Ok(FileEvent {
                path: PathBuf::from(path),
            }))
            .unwrap();
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn expect_batch(action: Action) -> Vec<PathBuf> {
        match action {
            Action::ManifestFilesChanged { files, .. } => files,
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rest_timer_batches_changes() {
        let mut fixture = start_watcher(Duration::from_millis(200), Duration::from_secs(10));

        send(&fixture, "/proj/a.rs");
        send(&fixture, "/proj/b.rs");
        send(&fixture, "/proj/a.rs"); // duplicate, collapsed

        let files = expect_batch(fixture.store.next_action().await.unwrap());
        assert_eq!(
            files,
            [PathBuf::from("/proj/a.rs"), PathBuf::from("/proj/b.rs")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_separated_by_quiet_periods() {
        let mut fixture = start_watcher(Duration::from_millis(200), Duration::from_secs(10));

        send(&fixture, "/proj/a.rs");
        let first = expect_batch(fixture.store.next_action().await.unwrap());

        send(&fixture, "/proj/b.rs");
        let second = expect_batch(fixture.store.next_action().await.unwrap());

        assert_eq!(first, [PathBuf::from("/proj/a.rs")]);
        assert_eq!(second, [PathBuf::from("/proj/b.rs")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_timer_fires_under_sustained_changes() {
        let mut fixture = start_watcher(Duration::from_millis(200), Duration::from_secs(10));

        // A change every 150 ms never lets the rest timer elapse; the cap
        // timer flushes the batch at 10 s anyway.
        for i in 0..70 {
            send(&fixture, &format!("/proj/f{i}.rs"));
            settle().await;
            tokio::time::advance(Duration::from_millis(150)).await;
        }

        let files = expect_batch(fixture.store.next_action().await.unwrap());
        assert!(!files.is_empty());
        assert!(files.contains(&PathBuf::from("/proj/f0.rs")));
        // The batch was cut at the cap, not at the end of the stream
        assert!(files.len() < 70);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_outside_roots_are_ignored() {
        let mut fixture = start_watcher(Duration::from_millis(200), Duration::from_secs(10));

        send(&fixture, "/elsewhere/x.rs");
        send(&fixture, "/proj/a.rs");

        let files = expect_batch(fixture.store.next_action().await.unwrap());
        assert_eq!(files, [PathBuf::from("/proj/a.rs")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_becomes_fatal_action() {
        let mut fixture = start_watcher(Duration::from_millis(200), Duration::from_secs(10));

        fixture
            .events
            .send(Err(Error::watch("inotify queue overflow")))
            .unwrap();

        match fixture.store.next_action().await.unwrap() {
            Action::Error { error } => {
                assert_eq!(error, Error::watch("inotify queue overflow"));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_fails_when_source_construction_fails() {
        let store = Store::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let maker: WatchSourceMaker =
            Arc::new(|_roots: &[PathBuf]| Err(Error::watch("too many open files")));

        let result = spawn_manifest_watchers(
            &[test_manifest()],
            &maker,
            Duration::from_millis(200),
            Duration::from_secs(10),
            store.dispatcher(),
            shutdown_rx,
        );

        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_roots_deliver_to_each_manifest() {
        let mut store = Store::new();
        let (events_a, rx_a) = mpsc::unbounded_channel();
        let (events_b, rx_b) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        for (name, rx) in [("api", rx_a), ("web", rx_b)] {
            tokio::spawn(debounce_loop(
                ManifestName::new(name),
                vec![PathBuf::from("/proj")],
                Box::new(ChannelWatchSource { rx }),
                Duration::from_millis(200),
                Duration::from_secs(10),
                store.dispatcher(),
                shutdown_rx.clone(),
            ));
        }

        // The same path lands in both manifests' sources
        let shared = FileEvent {
            path: PathBuf::from("/proj/shared.rs"),
        };
        events_a.send(Ok(shared.clone())).unwrap();
        events_b.send(Ok(shared)).unwrap();

        let mut names = vec![];
        for _ in 0..2 {
            match store.next_action().await.unwrap() {
                Action::ManifestFilesChanged { manifest_name, files } => {
                    assert_eq!(files, [PathBuf::from("/proj/shared.rs")]);
                    names.push(manifest_name.to_string());
                }
                other => panic!("unexpected action: {:?}", other),
            }
        }
        names.sort();
        assert_eq!(names, ["api", "web"]);
    }
}
