//! Engine - the reactive orchestration core
//!
//! One loop owns all state mutation: it drains actions from the store,
//! applies the matching reducer, starts at most one build at a time, and
//! refreshes the display snapshot. External sources (file watchers, the pod
//! watcher, build tasks) only ever talk to it through dispatched actions.

pub mod action;
mod build;
pub mod handler;
pub mod state;
pub mod store;
pub mod view;

pub use action::Action;
pub use state::{EngineState, ManifestState};
pub use store::{Dispatcher, Store};
pub use view::{EngineView, ManifestStatus, ManifestView, SharedView};

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::cluster::{spawn_pod_watcher, ClusterClient, PodSource};
use crate::common::prelude::*;
use crate::config::Settings;
use crate::core::Manifest;
use crate::services::{reap_old_watch_builds, BuildAndDeployer, ImageReaper, ManifestEvaluator};
use crate::watcher::{spawn_manifest_watchers, WatchSourceMaker};

// When we see a file change, wait this long to see if any other files have
// changed, and bundle all changes together. Long enough to coalesce an IDE
// save-all, short enough to stay out of the deploy latency budget.
pub const WATCH_MIN_REST: Duration = Duration::from_millis(200);

// When waiting for a quiet period to aggregate notifications, if we haven't
// seen one by this deadline, send off whatever we've got.
pub const WATCH_MAX: Duration = Duration::from_secs(10);

/// When a build kicks off because files changed, print at most this many paths
pub const MAX_CHANGED_FILES_TO_PRINT: usize = 5;

/// The main loop refreshes the display snapshot at least this often
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle that requests a clean engine shutdown
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Signal the loop and every background task to stop
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Orchestration engine.
///
/// Owns the store and every collaborator handle. Background tasks receive
/// only a `Dispatcher`, a shutdown receiver, and the immutable inputs they
/// were given at spawn time; `EngineState` never leaves the loop.
pub struct Engine {
    store: Store,
    builder: Arc<dyn BuildAndDeployer>,
    cluster: Arc<dyn ClusterClient>,
    evaluator: Arc<dyn ManifestEvaluator>,
    reaper: Arc<dyn ImageReaper>,
    watch_source_maker: WatchSourceMaker,
    pod_source: Option<Box<dyn PodSource>>,
    settings: Settings,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
    view: SharedView,
    watcher_tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        builder: Arc<dyn BuildAndDeployer>,
        cluster: Arc<dyn ClusterClient>,
        evaluator: Arc<dyn ManifestEvaluator>,
        reaper: Arc<dyn ImageReaper>,
        watch_source_maker: WatchSourceMaker,
        pod_source: Box<dyn PodSource>,
        settings: Settings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            store: Store::new(),
            builder,
            cluster,
            evaluator,
            reaper,
            watch_source_maker,
            pod_source: Some(pod_source),
            settings,
            shutdown: ShutdownHandle {
                tx: Arc::new(shutdown_tx),
            },
            shutdown_rx,
            view: Arc::new(RwLock::new(EngineView::default())),
            watcher_tasks: Vec::new(),
        }
    }

    /// Get a dispatcher handle for external action sources
    pub fn dispatcher(&self) -> Dispatcher {
        self.store.dispatcher()
    }

    /// Get the shared view slot the display reads from
    pub fn view(&self) -> SharedView {
        Arc::clone(&self.view)
    }

    /// Get a handle that can request shutdown after `run` takes ownership
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run the engine over the declared manifests.
    ///
    /// Performs an initial build of every manifest. With `watch_mounts` the
    /// loop then keeps rebuilding on changes until shutdown; without it the
    /// loop exits once the queue drains, or with the first build error.
    pub async fn run(mut self, manifests: Vec<Manifest>, watch_mounts: bool) -> Result<()> {
        let result = self.run_loop(manifests, watch_mounts).await;

        // Stop the watchers on every exit path, fatal errors included
        self.shutdown.shutdown();
        for task in self.watcher_tasks.drain(..) {
            match tokio::time::timeout(Duration::from_secs(2), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Watcher task panicked: {}", e),
                Err(_) => warn!("Watcher task cleanup timed out"),
            }
        }

        result
    }

    async fn run_loop(&mut self, manifests: Vec<Manifest>, watch_mounts: bool) -> Result<()> {
        self.store.dispatcher().dispatch(Action::Init {
            watch_mounts,
            manifests,
        })?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        let refresh_interval = self.settings.display.refresh_interval();

        loop {
            if !self.store.state().manifest_states.is_empty() {
                self.maybe_start_build();
                view::refresh_shared_view(&self.view, self.store.state());
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                action = self.store.next_action() => {
                    let Some(action) = action else {
                        return Err(Error::ChannelClosed);
                    };
                    match action {
                        Action::Init { watch_mounts, manifests } => {
                            self.handle_init_action(watch_mounts, manifests)?;
                        }
                        Action::ManifestFilesChanged { manifest_name, files } => {
                            handler::handle_fs_event(
                                self.store.mutable_state(),
                                &manifest_name,
                                &files,
                            );
                        }
                        Action::PodChange { manifest_name, pod } => {
                            handler::handle_pod_event(
                                self.store.mutable_state(),
                                &manifest_name,
                                pod,
                            );
                        }
                        Action::BuildComplete { result } => {
                            self.handle_completed_build(result).await?;
                            let state = self.store.state();
                            if !state.watch_mounts && state.manifests_to_build.is_empty() {
                                view::refresh_shared_view(&self.view, state);
                                return Ok(());
                            }
                        }
                        Action::Error { error } => {
                            return Err(error);
                        }
                    }
                }
                _ = tokio::time::sleep(refresh_interval) => {}
            }
        }
    }

    /// Apply the init reducer, then start the watchers and the reaper.
    fn handle_init_action(&mut self, watch_mounts: bool, manifests: Vec<Manifest>) -> Result<()> {
        handler::handle_init(
            self.store.mutable_state(),
            watch_mounts,
            &manifests,
            self.settings.build.browser,
        );

        if watch_mounts {
            self.watcher_tasks = spawn_manifest_watchers(
                &manifests,
                &self.watch_source_maker,
                self.settings.watcher.min_rest(),
                self.settings.watcher.max_batch(),
                self.store.dispatcher(),
                self.shutdown_rx.clone(),
            )?;

            if let Some(source) = self.pod_source.take() {
                spawn_pod_watcher(source, self.store.dispatcher(), self.shutdown_rx.clone());
            }

            let reaper = Arc::clone(&self.reaper);
            let reap_manifests = manifests;
            tokio::spawn(async move {
                if let Err(e) =
                    reap_old_watch_builds(reaper.as_ref(), &reap_manifests, Local::now()).await
                {
                    debug!("Error garbage collecting builds: {}", e);
                }
            });
        }

        Ok(())
    }
}
