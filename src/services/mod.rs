//! Service seams for external collaborators
//!
//! The engine never builds, deploys, or evaluates configs itself; it drives
//! these traits. Implementations live outside the core.

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::common::prelude::*;
use crate::core::{BuildLog, BuildResult, BuildState, ImageRef, Manifest, ManifestName};

/// Builds a manifest's image and deploys it to the cluster.
///
/// Implementations may cooperatively abort when the engine shuts down; a
/// completion delivered after shutdown is dropped with the action channel.
#[async_trait]
pub trait BuildAndDeployer: Send + Sync {
    /// Build and deploy one manifest. Errors marked permanent
    /// (`Error::is_permanent`) abort the engine even in watch mode.
    async fn build_and_deploy(
        &self,
        manifest: &Manifest,
        build_state: &BuildState,
        log: BuildLog,
    ) -> Result<BuildResult>;
}

/// Re-evaluates the project config to produce fresh manifest definitions.
///
/// Runs synchronously on the engine loop during dispatch, before the build
/// task is spawned. The exactly-one-result check belongs to the engine, not
/// the evaluator.
pub trait ManifestEvaluator: Send + Sync {
    fn load_manifests(&self, name: &ManifestName) -> Result<Vec<Manifest>>;
}

// ─────────────────────────────────────────────────────────
// Image reaping
// ─────────────────────────────────────────────────────────

/// Label applied to images produced by incremental watch-mode builds
pub const BUILD_MODE_LABEL: &str = "dev.windlass.build-mode";

/// Label value marking an image built on top of an existing one
pub const BUILD_MODE_EXISTING: &str = "existing";

/// Criteria for selecting images to remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFilter {
    /// Match images carrying a label with this exact value
    LabelValue(String, String),
    /// Match images by reference name
    RefName(ImageRef),
}

/// Removes images this tool built in earlier runs
#[async_trait]
pub trait ImageReaper: Send + Sync {
    async fn remove_images(
        &self,
        older_than: DateTime<Local>,
        dry_run: bool,
        filters: &[ImageFilter],
    ) -> Result<()>;
}

/// Remove watch-mode images left over from previous runs, per manifest ref.
///
/// Called once at init; failures are reported to the caller, which logs
/// them and moves on.
pub async fn reap_old_watch_builds(
    reaper: &dyn ImageReaper,
    manifests: &[Manifest],
    created_before: DateTime<Local>,
) -> Result<()> {
    let watch_filter = ImageFilter::LabelValue(
        BUILD_MODE_LABEL.to_string(),
        BUILD_MODE_EXISTING.to_string(),
    );

    for manifest in manifests {
        let filters = [
            watch_filter.clone(),
            ImageFilter::RefName(manifest.image_ref.clone()),
        ];
        reaper
            .remove_images(created_before, false, &filters)
            .await
            .map_err(|e| Error::cluster(format!("reap old watch builds: {}", e)))?;
    }

    Ok(())
}
