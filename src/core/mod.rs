//! Core domain types: manifests, pods, build state, logs

pub mod log_filter;
pub mod manifest;
pub mod types;

pub use log_filter::{FilterSource, LogFilter};
pub use manifest::{ConfigMatcher, ImageRef, Manifest, ManifestName};
pub use types::{
    BuildLog, BuildResult, BuildState, Entity, LoadBalancerSpec, LogLevel, LogLine, Pod, SpanId,
};
