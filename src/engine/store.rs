//! Store: single-owner engine state plus the ordered action channel
//!
//! The store does no locking of its own. Every mutation funnels through the
//! engine loop, which is the only holder of `&mut Store`; background tasks
//! get a cloned `Dispatcher` and nothing else.

use tokio::sync::mpsc;

use crate::common::error::{Error, Result};
use crate::engine::action::Action;
use crate::engine::state::EngineState;

/// Cloneable sender half of the action channel.
///
/// Handed to the file watchers, the pod watcher, and each build task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Action>,
}

impl Dispatcher {
    /// Enqueue an action. Fails only when the engine loop is gone.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        self.tx.send(action).map_err(|_| Error::ChannelClosed)
    }
}

/// Owns `EngineState` and delivers a totally ordered action stream
#[derive(Debug)]
pub struct Store {
    state: EngineState,
    action_tx: mpsc::UnboundedSender<Action>,
    action_rx: mpsc::UnboundedReceiver<Action>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            state: EngineState::new(),
            action_tx,
            action_rx,
        }
    }

    /// Get a dispatcher handle for background tasks
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.action_tx.clone(),
        }
    }

    /// Receive the next action, in dispatch order
    pub async fn next_action(&mut self) -> Option<Action> {
        self.action_rx.recv().await
    }

    /// Read-only state access
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Mutable state access, reserved for the reducer loop
    pub fn mutable_state(&mut self) -> &mut EngineState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManifestName;

    #[tokio::test]
    async fn test_actions_are_delivered_in_dispatch_order() {
        let mut store = Store::new();
        let dispatcher = store.dispatcher();

        for i in 0..5 {
            dispatcher
                .dispatch(Action::ManifestFilesChanged {
                    manifest_name: ManifestName::new(format!("m{i}")),
                    files: vec![],
                })
                .unwrap();
        }

        for i in 0..5 {
            match store.next_action().await.unwrap() {
                Action::ManifestFilesChanged { manifest_name, .. } => {
                    assert_eq!(manifest_name.as_str(), format!("m{i}"));
                }
                other => panic!("unexpected action: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatchers_share_one_ordered_channel() {
        let mut store = Store::new();
        let a = store.dispatcher();
        let b = store.dispatcher();

        a.dispatch(Action::ManifestFilesChanged {
            manifest_name: ManifestName::new("first"),
            files: vec![],
        })
        .unwrap();
        b.dispatch(Action::ManifestFilesChanged {
            manifest_name: ManifestName::new("second"),
            files: vec![],
        })
        .unwrap();

        let names: Vec<String> = [store.next_action().await, store.next_action().await]
            .into_iter()
            .map(|action| match action.unwrap() {
                Action::ManifestFilesChanged { manifest_name, .. } => manifest_name.to_string(),
                other => panic!("unexpected action: {:?}", other),
            })
            .collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn test_mutable_state_is_the_same_state() {
        let mut store = Store::new();
        store.mutable_state().completed_build_count = 3;
        assert_eq!(store.state().completed_build_count, 3);
    }
}
