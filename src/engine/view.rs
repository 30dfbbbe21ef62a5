//! Read-only view projection for the display layer
//!
//! The display never borrows `EngineState`; after each loop tick the engine
//! projects the state into an `EngineView` and swaps it into a shared slot.
//! The swap uses `try_write` so a display holding the lock can never stall
//! the reducer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::RwLock;

use crate::core::ManifestName;
use crate::engine::state::{EngineState, ManifestState};

/// Coarse per-manifest status for the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    /// Never built, not yet dispatched
    Pending,
    /// Waiting in the build queue
    Queued,
    /// Build task in flight
    Building,
    /// Last build succeeded
    Ok,
    /// Last build failed
    Error,
}

/// Snapshot of one manifest's state
#[derive(Debug, Clone)]
pub struct ManifestView {
    pub name: ManifestName,
    pub status: ManifestStatus,
    pub pending_file_count: usize,
    pub last_error: Option<String>,
    pub last_build_finish_time: Option<DateTime<Local>>,
    pub last_build_duration: Option<Duration>,
    pub pod_name: Option<String>,
    pub pod_status: Option<String>,
    pub lb_count: usize,
}

/// Snapshot of the whole engine, in manifest definition order
#[derive(Debug, Clone, Default)]
pub struct EngineView {
    pub manifests: Vec<ManifestView>,
    pub completed_build_count: usize,
    pub initial_build_count: usize,
    pub currently_building: Option<ManifestName>,
    pub queued: Vec<ManifestName>,
    pub watch_mounts: bool,
}

/// Shared slot the display reads from
pub type SharedView = Arc<RwLock<EngineView>>;

fn manifest_status(state: &EngineState, name: &ManifestName, ms: &ManifestState) -> ManifestStatus {
    if state.currently_building.as_ref() == Some(name) {
        ManifestStatus::Building
    } else if state.is_queued(name) {
        ManifestStatus::Queued
    } else if !ms.has_been_built {
        ManifestStatus::Pending
    } else if ms.last_error.is_some() {
        ManifestStatus::Error
    } else {
        ManifestStatus::Ok
    }
}

/// Project the engine state into a display snapshot
pub fn view_of(state: &EngineState) -> EngineView {
    let manifests = state
        .manifest_definition_order
        .iter()
        .filter_map(|name| state.manifest_states.get(name).map(|ms| (name, ms)))
        .map(|(name, ms)| ManifestView {
            name: name.clone(),
            status: manifest_status(state, name, ms),
            pending_file_count: ms.pending_file_changes.len(),
            last_error: ms.last_error.as_ref().map(|e| e.to_string()),
            last_build_finish_time: ms.last_build_finish_time,
            last_build_duration: ms.last_build_duration,
            pod_name: ms.pod.as_ref().map(|p| p.name.clone()),
            pod_status: ms.pod.as_ref().map(|p| p.status.clone()),
            lb_count: ms.lbs.len(),
        })
        .collect();

    EngineView {
        manifests,
        completed_build_count: state.completed_build_count,
        initial_build_count: state.initial_build_count,
        currently_building: state.currently_building.clone(),
        queued: state.manifests_to_build.iter().cloned().collect(),
        watch_mounts: state.watch_mounts,
    }
}

/// Swap a fresh projection into the shared slot, skipping the cycle if the
/// display currently holds the lock.
pub fn refresh_shared_view(slot: &SharedView, state: &EngineState) {
    if let Ok(mut view) = slot.try_write() {
        *view = view_of(state);
    }
}
