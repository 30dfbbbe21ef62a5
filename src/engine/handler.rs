//! Reducers: pure-ish state transitions for each action kind
//!
//! These are free functions over `(&mut EngineState, action data)`. Side
//! effects (spawning watchers, launching builds, opening browsers) belong to
//! the engine loop; the only I/O here is the broken-symlink probe of the
//! spurious-change classifier.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::common::prelude::*;
use crate::config::BrowserMode;
use crate::core::{Manifest, ManifestName, Pod};
use crate::engine::state::{EngineState, ManifestState};

/// Register the declared manifests and enqueue the initial build pass.
///
/// Watcher/reaper startup is the engine's job, performed right after this
/// reducer runs.
pub fn handle_init(
    state: &mut EngineState,
    watch_mounts: bool,
    manifests: &[Manifest],
    browser_mode: BrowserMode,
) {
    for manifest in manifests {
        state
            .manifest_definition_order
            .push(manifest.name.clone());
        state
            .manifest_states
            .insert(manifest.name.clone(), ManifestState::new(manifest.clone()));
    }
    state.watch_mounts = watch_mounts;

    for manifest in manifests {
        state.enqueue_build(&manifest.name);
    }
    state.initial_build_count = state.manifests_to_build.len();

    if browser_mode == BrowserMode::Auto {
        state.open_browser_on_next_lb = true;
    }
}

/// Fold a debounced batch of changed files into a manifest's pending set
/// and enqueue it unless the set is spurious.
///
/// A manifest whose build is in flight is not enqueued here; the completion
/// handler re-enqueues it if changes are still pending, so a name is never
/// queued and building at the same time.
pub fn handle_fs_event(state: &mut EngineState, manifest_name: &ManifestName, files: &[PathBuf]) {
    let Some(ms) = state.manifest_states.get_mut(manifest_name) else {
        warn!("file change for unknown manifest '{}'", manifest_name);
        return;
    };

    if files.iter().any(|f| ms.manifest.config_matcher.matches(f)) {
        debug!("change batch for '{}' contains config files", manifest_name);
        ms.config_is_dirty = true;
    }

    for file in files {
        ms.pending_file_changes.insert(file.clone());
    }

    match only_spurious_changes(&ms.pending_file_changes) {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => info!("build watch error: {}", e),
    }

    if state.currently_building.as_ref() == Some(manifest_name) {
        return;
    }

    state.enqueue_build(manifest_name);
}

/// Upsert a manifest's observed pod.
///
/// The replacement rule makes rollouts converge deterministically: a status
/// refresh for the same pod always lands, and otherwise the most recently
/// started pod wins. Older pods are ignored.
pub fn handle_pod_event(state: &mut EngineState, manifest_name: &ManifestName, pod: Pod) {
    let Some(ms) = state.manifest_states.get_mut(manifest_name) else {
        info!(
            "error: got notified of pod for unknown manifest '{}'",
            manifest_name
        );
        return;
    };

    let replace = match &ms.pod {
        None => true,
        Some(old) => old.name == pod.name || old.started_at < pod.started_at,
    };
    if replace {
        ms.pod = Some(pod);
    }
}

/// Check if the changed set only contains spurious changes that we don't
/// want to rebuild on, like IDE temp/lock files.
///
/// More than 3 simultaneous changes are always treated as real work;
/// otherwise every path must be a broken symlink for the set to be
/// spurious.
pub fn only_spurious_changes(files_changed: &BTreeSet<PathBuf>) -> io::Result<bool> {
    if files_changed.len() > 3 {
        return Ok(false);
    }

    for file in files_changed {
        if !is_broken_symlink(file)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A path is a broken symlink when lstat sees a symlink whose target is
/// gone. A path that doesn't exist at all was deleted, which is real work.
fn is_broken_symlink(path: &Path) -> io::Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if !metadata.file_type().is_symlink() {
        return Ok(false);
    }

    match std::fs::metadata(path) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}
