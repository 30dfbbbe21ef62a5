//! Cluster integration: pod event stream and cluster client seam
//!
//! The pod watcher turns raw cluster pod events into `Action::PodChange`
//! messages keyed by a manifest label. The newest-wins replacement rule
//! lives in the reducer, which owns the state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::prelude::*;
use crate::core::{Entity, LoadBalancerSpec, ManifestName, Pod};
use crate::engine::{Action, Dispatcher};

/// Pod label holding the name of the manifest that deployed it
pub const MANIFEST_NAME_LABEL: &str = "dev.windlass.manifest";

/// A raw pod event as reported by the cluster
#[derive(Debug, Clone)]
pub struct PodEvent {
    /// Pod name
    pub name: String,

    /// Pod labels; `MANIFEST_NAME_LABEL` attributes the pod to a manifest
    pub labels: HashMap<String, String>,

    /// Creation timestamp
    pub created_at: DateTime<Local>,

    /// Derived status string
    pub status: String,
}

impl PodEvent {
    /// The manifest this pod belongs to, if labeled
    pub fn manifest_name(&self) -> Option<ManifestName> {
        self.labels
            .get(MANIFEST_NAME_LABEL)
            .filter(|v| !v.is_empty())
            .map(|v| ManifestName::new(v.clone()))
    }
}

/// Stream of pod events from the cluster
#[async_trait]
pub trait PodSource: Send + Sync {
    /// Next pod event; `None` when the stream ends
    async fn next_event(&mut self) -> Option<PodEvent>;
}

/// Narrow cluster API surface the engine needs
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Resolve a load balancer to a reachable URL, if it has one yet
    async fn resolve_load_balancer(&self, lb: &LoadBalancerSpec) -> Result<Option<String>>;

    /// Open a deployed service in the user's browser
    async fn open_service(&self, lb: &LoadBalancerSpec) -> Result<()>;
}

/// Extract the load balancer specs from a deploy's entities
pub fn load_balancer_specs(entities: &[Entity]) -> Vec<LoadBalancerSpec> {
    entities
        .iter()
        .filter_map(|e| e.load_balancer.clone())
        .collect()
}

/// Spawn the pod watcher task.
///
/// Unlabeled pod events are dropped here; events for unknown manifests are
/// dropped later by the reducer, which can see the state.
pub fn spawn_pod_watcher(
    mut source: Box<dyn PodSource>,
    dispatcher: Dispatcher,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("Pod watcher stopping");
                    return;
                }
                event = source.next_event() => {
                    let Some(event) = event else {
                        debug!("Pod event stream ended");
                        return;
                    };
                    let Some(manifest_name) = event.manifest_name() else {
                        continue;
                    };
                    let pod = Pod::new(event.name, event.created_at, event.status);
                    if dispatcher
                        .dispatch(Action::PodChange { manifest_name, pod })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Store;
    use tokio::sync::mpsc;

    struct ChannelPodSource {
        rx: mpsc::UnboundedReceiver<PodEvent>,
    }

    #[async_trait]
    impl PodSource for ChannelPodSource {
        async fn next_event(&mut self) -> Option<PodEvent> {
            self.rx.recv().await
        }
    }

    fn labeled_event(pod_name: &str, manifest: &str) -> PodEvent {
        let mut labels = HashMap::new();
        if !manifest.is_empty() {
            labels.insert(MANIFEST_NAME_LABEL.to_string(), manifest.to_string());
        }
        PodEvent {
            name: pod_name.to_string(),
            labels,
            created_at: Local::now(),
            status: "Running".to_string(),
        }
    }

    #[test]
    fn test_manifest_name_from_labels() {
        assert_eq!(
            labeled_event("p1", "api").manifest_name(),
            Some(ManifestName::new("api"))
        );
        assert_eq!(labeled_event("p1", "").manifest_name(), None);
    }

    #[test]
    fn test_load_balancer_specs_extraction() {
        let entities = vec![
            Entity {
                name: "deploy/api".to_string(),
                load_balancer: None,
            },
            Entity {
                name: "svc/api".to_string(),
                load_balancer: Some(LoadBalancerSpec {
                    service_name: "api".to_string(),
                    ports: vec![8080],
                }),
            },
        ];

        let specs = load_balancer_specs(&entities);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].service_name, "api");
    }

    #[tokio::test]
    async fn test_watcher_dispatches_labeled_events_only() {
        let mut store = Store::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_pod_watcher(
            Box::new(ChannelPodSource { rx }),
            store.dispatcher(),
            shutdown_rx,
        );

        tx.send(labeled_event("api-1", "")).unwrap();
        tx.send(labeled_event("api-2", "api")).unwrap();
        drop(tx);
        handle.await.unwrap();

        let action = store.next_action().await.unwrap();
        match action {
            Action::PodChange { manifest_name, pod } => {
                assert_eq!(manifest_name.as_str(), "api");
                assert_eq!(pod.name, "api-2");
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watcher_stops_on_shutdown() {
        let store = Store::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_pod_watcher(
            Box::new(ChannelPodSource { rx }),
            store.dispatcher(),
            shutdown_rx,
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
