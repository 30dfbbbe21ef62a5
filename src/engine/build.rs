//! Build dispatch and completion
//!
//! `maybe_start_build` pops the queue head and launches one build task;
//! `handle_completed_build` applies the terminal `BuildComplete` action.
//! Everything here except the spawned task body runs on the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;

use crate::cluster::load_balancer_specs;
use crate::common::prelude::*;
use crate::core::{
    BuildLog, BuildResult, BuildState, LoadBalancerSpec, LogLine, Manifest, ManifestName, SpanId,
};
use crate::engine::action::Action;
use crate::engine::handler::only_spurious_changes;
use crate::engine::state::EngineState;
use crate::engine::Engine;
use crate::services::ManifestEvaluator;

impl Engine {
    /// Dispatch the next queued build, if the engine is idle.
    ///
    /// All bookkeeping happens synchronously on the loop before the build
    /// task is spawned; the task receives only immutable inputs and posts
    /// exactly one `BuildComplete` back through the store.
    pub(crate) fn maybe_start_build(&mut self) {
        let dispatcher = self.store.dispatcher();
        let builder = Arc::clone(&self.builder);
        let max_print = self.settings.display.max_changed_files_to_print;

        let state = self.store.mutable_state();
        if state.currently_building.is_some() || state.manifests_to_build.is_empty() {
            return;
        }

        let Some(mn) = state.manifests_to_build.pop_front() else {
            return;
        };
        state.currently_building = Some(mn.clone());

        let config_is_dirty = state
            .manifest_states
            .get(&mn)
            .map(|ms| ms.config_is_dirty)
            .unwrap_or(false);
        let reloaded = if config_is_dirty {
            Some(load_single_manifest(self.evaluator.as_ref(), &mn))
        } else {
            None
        };

        let state = self.store.mutable_state();
        let Some(ms) = state.manifest_states.get_mut(&mn) else {
            warn!("queued manifest '{}' has no state", mn);
            state.currently_building = None;
            return;
        };
        ms.queue_entry_time = None;

        match reloaded {
            Some(Err(err)) => {
                // The definition itself is broken; give up on this dispatch.
                // The next fs-event re-enqueues the manifest.
                info!("getting new manifest error: {}", err);
                ms.last_error = Some(err);
                ms.last_build_finish_time = Some(Local::now());
                ms.last_build_duration = Some(Duration::ZERO);
                state.currently_building = None;
                return;
            }
            Some(Ok(manifest)) => {
                ms.last_build = BuildState::clean();
                ms.manifest = manifest;
                ms.config_is_dirty = false;
            }
            None => {}
        }

        let pending: Vec<PathBuf> = std::mem::take(&mut ms.pending_file_changes)
            .into_iter()
            .collect();
        ms.currently_building_file_changes.extend(pending);

        let build_state = ms
            .last_build
            .new_state_with_files_changed(ms.currently_building_file_changes.clone());
        let manifest = ms.manifest.clone();

        ms.current_build_start = Some(Instant::now());
        let build_log = ms.current_build_log.clone();
        let first_build = !ms.has_been_built;
        ms.has_been_built = true;

        log_build_event(first_build, &manifest, &build_state, &build_log, max_print);

        tokio::spawn(async move {
            let result = builder
                .build_and_deploy(&manifest, &build_state, build_log)
                .await;
            let _ = dispatcher.dispatch(Action::BuildComplete { result });
        });
    }

    /// Apply a build completion: stamp timings, rotate logs, record the
    /// result, and decide whether the engine survives it.
    ///
    /// The building manifest's name is resolved first and
    /// `currently_building` is cleared on every exit path, before any error
    /// propagates.
    pub(crate) async fn handle_completed_build(
        &mut self,
        result: std::result::Result<BuildResult, Error>,
    ) -> Result<()> {
        let state = self.store.mutable_state();
        state.completed_build_count += 1;
        let finished_initial_pass = state.completed_build_count == state.initial_build_count;

        let Some(mn) = state.currently_building.clone() else {
            warn!("build completion with no build in flight");
            return Ok(());
        };

        let applied = apply_build_result(state, &mn, result);

        state.currently_building = None;

        // Changes that arrived while the build ran were parked in the
        // pending set; re-enqueue now that the manifest is idle again.
        if let Some(ms) = state.manifest_states.get(&mn) {
            if !ms.pending_file_changes.is_empty() {
                let spurious = only_spurious_changes(&ms.pending_file_changes).unwrap_or_else(|e| {
                    info!("build watch error: {}", e);
                    false
                });
                if !spurious {
                    state.enqueue_build(&mn);
                }
            }
        }

        if finished_initial_pass {
            debug!("finished initial build");
        }

        let lb_to_open = applied?;

        if let Some(lb) = lb_to_open {
            self.cluster.open_service(&lb).await?;
            self.store.mutable_state().open_browser_on_next_lb = false;
        }

        if self.store.state().watch_mounts {
            self.log_deploy_summary().await;

            if self.store.state().manifests_to_build.is_empty() {
                info!("Awaiting changes…");
            }
        }

        Ok(())
    }

    /// Resolve every deployed load balancer to a URL and log it, so the
    /// user can see where their services live after each watch-mode build.
    async fn log_deploy_summary(&self) {
        let targets: Vec<(ManifestName, Vec<LoadBalancerSpec>)> = self
            .store
            .state()
            .manifest_definition_order
            .iter()
            .filter_map(|name| self.store.state().manifest_states.get(name).map(|ms| (name, ms)))
            .filter(|(_, ms)| !ms.lbs.is_empty())
            .map(|(name, ms)| (name.clone(), ms.lbs.clone()))
            .collect();

        for (name, lbs) in targets {
            for lb in lbs {
                match self.cluster.resolve_load_balancer(&lb).await {
                    Ok(Some(url)) => info!("{} → {}", name, url),
                    Ok(None) => {}
                    // Malformed deploy specs show up here while the user is
                    // mid-edit; not worth more than a debug line.
                    Err(e) => debug!("deploy summary: {}", e),
                }
            }
        }
    }
}

/// Re-evaluate the project config for one manifest.
/// The evaluator must return exactly one definition for the name.
fn load_single_manifest(evaluator: &dyn ManifestEvaluator, name: &ManifestName) -> Result<Manifest> {
    let mut manifests = evaluator.load_manifests(name)?;
    if manifests.len() != 1 {
        return Err(Error::ManifestCount {
            name: name.to_string(),
            count: manifests.len(),
        });
    }
    Ok(manifests.remove(0))
}

/// Record a build result on the manifest state.
///
/// Returns the load balancer to open in a browser, if the one-shot flag is
/// armed and the deploy produced one. A returned error is fatal to the
/// engine; recoverable failures are logged and absorbed here.
fn apply_build_result(
    state: &mut EngineState,
    mn: &ManifestName,
    result: std::result::Result<BuildResult, Error>,
) -> Result<Option<LoadBalancerSpec>> {
    let watch_mounts = state.watch_mounts;
    let open_browser = state.open_browser_on_next_lb;

    let Some(ms) = state.manifest_states.get_mut(mn) else {
        warn!("build completed for unknown manifest '{}'", mn);
        return Ok(None);
    };

    ms.last_build_finish_time = Some(Local::now());
    ms.last_build_duration = ms.current_build_start.take().map(|start| start.elapsed());
    ms.last_build_log = std::mem::replace(&mut ms.current_build_log, BuildLog::new());

    match result {
        Err(err) => {
            ms.last_error = Some(err.clone());

            if err.is_permanent() {
                Err(err)
            } else if watch_mounts {
                info!("{}", err);
                Ok(None)
            } else {
                Err(match err {
                    Error::Build { .. } => err,
                    other => Error::build(other.to_string()),
                })
            }
        }
        Ok(build_result) => {
            ms.last_error = None;
            ms.last_successful_deploy_time = Some(Local::now());
            ms.lbs = load_balancer_specs(&build_result.entities);

            // Open only the first load balancer in a browser
            let lb_to_open = if open_browser {
                ms.lbs.first().cloned()
            } else {
                None
            };

            ms.last_successful_deploy_edits =
                std::mem::take(&mut ms.currently_building_file_changes);
            ms.last_build = BuildState::from_result(build_result);

            Ok(lb_to_open)
        }
    }
}

fn log_build_event(
    first_build: bool,
    manifest: &Manifest,
    build_state: &BuildState,
    build_log: &BuildLog,
    max_changed_files_to_print: usize,
) {
    if first_build {
        info!("Building manifest: {}", manifest.name);
        build_log.append(
            LogLine::info(format!("Building manifest: {}", manifest.name))
                .with_manifest(manifest.name.clone())
                .with_span(SpanId::new(format!("build:{}", manifest.name)))
                .with_build_event("init"),
        );
    } else {
        let changed = build_state.files_changed();
        let mut to_print: Vec<String> = changed
            .iter()
            .take(max_changed_files_to_print)
            .map(|p| p.display().to_string())
            .collect();
        if changed.len() > max_changed_files_to_print {
            to_print.push("…".to_string());
        }

        info!("  → {} changed: {:?}", changed.len(), to_print);
        info!("Rebuilding manifest: {}", manifest.name);
        build_log.append(
            LogLine::info(format!("Rebuilding manifest: {}", manifest.name))
                .with_manifest(manifest.name.clone())
                .with_span(SpanId::new(format!("build:{}", manifest.name)))
                .with_build_event("update"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Entity, ImageRef};

    fn lb(name: &str) -> LoadBalancerSpec {
        LoadBalancerSpec {
            service_name: name.to_string(),
            ports: vec![8080],
        }
    }

    struct CountingEvaluator {
        result: Vec<Manifest>,
    }

    impl ManifestEvaluator for CountingEvaluator {
        fn load_manifests(&self, _name: &ManifestName) -> Result<Vec<Manifest>> {
            Ok(self.result.clone())
        }
    }

    #[test]
    fn test_load_single_manifest_requires_exactly_one() {
        let name = ManifestName::new("api");
        let manifest = Manifest::new("api", ImageRef::new("registry.local/api"));

        let none = CountingEvaluator { result: vec![] };
        assert_eq!(
            load_single_manifest(&none, &name).unwrap_err(),
            Error::ManifestCount {
                name: "api".to_string(),
                count: 0
            }
        );

        let two = CountingEvaluator {
            result: vec![manifest.clone(), manifest.clone()],
        };
        assert!(load_single_manifest(&two, &name).is_err());

        let one = CountingEvaluator {
            result: vec![manifest],
        };
        assert_eq!(load_single_manifest(&one, &name).unwrap().name.as_str(), "api");
    }

    #[test]
    fn test_log_build_event_marks_build_boundaries() {
        let manifest = Manifest::new("api", ImageRef::new("registry.local/api"));
        let log = BuildLog::new();

        log_build_event(true, &manifest, &BuildState::clean(), &log, 5);
        let changed: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("/proj/f{i}.rs"))).collect();
        let rebuild_state = BuildState::clean().new_state_with_files_changed(changed);
        log_build_event(false, &manifest, &rebuild_state, &log, 5);

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].build_event.as_deref(), Some("init"));
        assert_eq!(lines[1].build_event.as_deref(), Some("update"));
        assert!(lines.iter().all(|l| l.span_id.is_build()));
    }

    #[test]
    fn test_apply_success_records_deploy() {
        let mut state = test_state("api", true);
        state.open_browser_on_next_lb = true;
        let mn = ManifestName::new("api");
        state.currently_building = Some(mn.clone());
        let ms = state.manifest_states.get_mut(&mn).unwrap();
        ms.current_build_start = Some(Instant::now());
        ms.currently_building_file_changes = vec![PathBuf::from("/proj/a.rs")];

        let result = BuildResult {
            image: Some(ImageRef::new("registry.local/api")),
            entities: vec![Entity {
                name: "svc/api".to_string(),
                load_balancer: Some(lb("api")),
            }],
        };

        let opened = apply_build_result(&mut state, &mn, Ok(result)).unwrap();
        assert_eq!(opened, Some(lb("api")));

        let ms = &state.manifest_states[&mn];
        assert!(ms.last_error.is_none());
        assert!(!ms.last_build.is_clean());
        assert!(ms.currently_building_file_changes.is_empty());
        assert_eq!(ms.last_successful_deploy_edits, [PathBuf::from("/proj/a.rs")]);
        assert_eq!(ms.lbs.len(), 1);
        assert!(ms.last_build_finish_time.is_some());
    }

    #[test]
    fn test_apply_transient_failure_in_watch_mode_is_absorbed() {
        let mut state = test_state("api", true);
        let mn = ManifestName::new("api");
        state.currently_building = Some(mn.clone());

        let outcome = apply_build_result(&mut state, &mn, Err(Error::build("registry flake")));
        assert_eq!(outcome.unwrap(), None);
        assert_eq!(
            state.manifest_states[&mn].last_error,
            Some(Error::build("registry flake"))
        );
    }

    #[test]
    fn test_apply_failure_without_watch_is_fatal() {
        let mut state = test_state("api", false);
        let mn = ManifestName::new("api");
        state.currently_building = Some(mn.clone());

        let err = apply_build_result(&mut state, &mn, Err(Error::build("boom"))).unwrap_err();
        assert_eq!(err.to_string(), "build failed: boom");
    }

    #[test]
    fn test_apply_permanent_failure_is_fatal_even_in_watch_mode() {
        let mut state = test_state("api", true);
        let mn = ManifestName::new("api");
        state.currently_building = Some(mn.clone());

        let err =
            apply_build_result(&mut state, &mn, Err(Error::permanent_build("bad recipe")))
                .unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_apply_rotates_build_logs() {
        let mut state = test_state("api", true);
        let mn = ManifestName::new("api");
        state.currently_building = Some(mn.clone());
        state.manifest_states.get_mut(&mn).unwrap()
            .current_build_log
            .append(LogLine::info("step 1/1"));

        apply_build_result(&mut state, &mn, Ok(BuildResult::default())).unwrap();

        let ms = &state.manifest_states[&mn];
        assert_eq!(ms.last_build_log.len(), 1);
        assert!(ms.current_build_log.is_empty());
    }

    fn test_state(name: &str, watch: bool) -> EngineState {
        use crate::config::BrowserMode;
        use crate::engine::handler::handle_init;

        let mut state = EngineState::new();
        let manifest = Manifest::new(name, ImageRef::new(format!("registry.local/{name}")));
        handle_init(&mut state, watch, &[manifest], BrowserMode::Off);
        state.manifests_to_build.clear();
        state
    }
}
