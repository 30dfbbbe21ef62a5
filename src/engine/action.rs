//! Action types for the engine (TEA pattern)
//!
//! Every mutation of `EngineState` is driven by exactly one of these
//! variants flowing through the store. The reducer match is exhaustive, so
//! adding a variant without handling it is a compile error.

use std::path::PathBuf;

use crate::common::error::Error;
use crate::core::{BuildResult, Manifest, ManifestName, Pod};

/// All possible actions in the engine
#[derive(Debug, Clone)]
pub enum Action {
    /// Declare the manifest set and start the initial build pass
    Init {
        /// Keep watching and rebuilding after the initial pass
        watch_mounts: bool,
        manifests: Vec<Manifest>,
    },

    /// Debounced batch of changed paths for one manifest
    ManifestFilesChanged {
        manifest_name: ManifestName,
        files: Vec<PathBuf>,
    },

    /// A pod owned by a manifest changed
    PodChange {
        manifest_name: ManifestName,
        pod: Pod,
    },

    /// The in-flight build finished
    BuildComplete {
        result: Result<BuildResult, Error>,
    },

    /// Fatal error from a background task; terminates the loop
    Error { error: Error },
}
