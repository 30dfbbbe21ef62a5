//! Engine state (Model in TEA pattern)

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;

use crate::common::error::Error;
use crate::core::{BuildLog, BuildState, LoadBalancerSpec, Manifest, ManifestName, Pod};

/// Per-manifest lifecycle state.
///
/// Created once per manifest at init, never destroyed.
#[derive(Debug)]
pub struct ManifestState {
    /// Current definition; replaced when a dirty config is re-evaluated
    pub manifest: Manifest,

    /// Paths observed since the last build was dispatched for this manifest
    pub pending_file_changes: BTreeSet<PathBuf>,

    /// Paths snapshotted at dispatch time; the input of the in-flight build
    pub currently_building_file_changes: Vec<PathBuf>,

    /// A pending change matched the config matcher; cleared only by a
    /// dispatch that has just reloaded the definition
    pub config_is_dirty: bool,

    /// Build provenance: clean, or derived from the last successful result
    pub last_build: BuildState,

    pub last_error: Option<Error>,
    pub last_build_finish_time: Option<DateTime<Local>>,
    pub last_build_duration: Option<Duration>,
    pub current_build_start: Option<Instant>,

    /// Buffered output of the in-flight build
    pub current_build_log: BuildLog,

    /// Buffered output of the previous build, rotated at completion
    pub last_build_log: BuildLog,

    /// False until the first dispatched build
    pub has_been_built: bool,

    /// When this manifest was enqueued; cleared at dispatch
    pub queue_entry_time: Option<Instant>,

    /// Latest observed pod, or `None` if no pod has been seen yet
    pub pod: Option<Pod>,

    /// Load balancers from the last successful deploy
    pub lbs: Vec<LoadBalancerSpec>,

    pub last_successful_deploy_time: Option<DateTime<Local>>,
    pub last_successful_deploy_edits: Vec<PathBuf>,
}

impl ManifestState {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            pending_file_changes: BTreeSet::new(),
            currently_building_file_changes: Vec::new(),
            config_is_dirty: false,
            last_build: BuildState::clean(),
            last_error: None,
            last_build_finish_time: None,
            last_build_duration: None,
            current_build_start: None,
            current_build_log: BuildLog::new(),
            last_build_log: BuildLog::new(),
            has_been_built: false,
            queue_entry_time: None,
            pod: None,
            lbs: Vec::new(),
            last_successful_deploy_time: None,
            last_successful_deploy_edits: Vec::new(),
        }
    }
}

/// Process-wide engine state, exclusively mutated by the reducer loop
#[derive(Debug, Default)]
pub struct EngineState {
    pub manifest_states: HashMap<ManifestName, ManifestState>,

    /// Names in the order they were declared at init, for stable display
    pub manifest_definition_order: Vec<ManifestName>,

    /// Names awaiting dispatch; a name appears at most once
    pub manifests_to_build: VecDeque<ManifestName>,

    /// Non-empty iff a build task is in flight
    pub currently_building: Option<ManifestName>,

    /// Long-running watch mode is active
    pub watch_mounts: bool,

    pub completed_build_count: usize,
    pub initial_build_count: usize,

    /// One-shot: open the first load balancer of the next successful deploy
    pub open_browser_on_next_lb: bool,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifests in definition order
    pub fn manifests(&self) -> Vec<&Manifest> {
        self.manifest_definition_order
            .iter()
            .filter_map(|name| self.manifest_states.get(name))
            .map(|ms| &ms.manifest)
            .collect()
    }

    /// Check if a manifest is waiting for dispatch
    pub fn is_queued(&self, name: &ManifestName) -> bool {
        self.manifests_to_build.contains(name)
    }

    /// Append a manifest to the build queue and stamp its entry time.
    /// Enqueuing a name already present is a no-op.
    pub fn enqueue_build(&mut self, name: &ManifestName) {
        if self.is_queued(name) {
            return;
        }
        self.manifests_to_build.push_back(name.clone());
        if let Some(ms) = self.manifest_states.get_mut(name) {
            ms.queue_entry_time = Some(Instant::now());
        }
    }
}
