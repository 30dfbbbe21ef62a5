//! Manifest definitions
//!
//! A manifest is a named recipe for building and deploying one workload.
//! The engine treats it as mostly opaque: it only needs the watched roots,
//! the config matcher, and the image reference.

use std::fmt;
use std::path::{Path, PathBuf};

/// Unique manifest identifier within an engine instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestName(String);

impl ManifestName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ManifestName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reference to a built image (registry/name, no tag)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Predicate over paths whose change invalidates the manifest definition
/// itself (the files the manifest was evaluated from).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMatcher {
    paths: Vec<PathBuf>,
}

impl ConfigMatcher {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Check if a changed path invalidates the manifest definition
    pub fn matches(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

/// A named recipe for building and deploying one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Unique name within the engine
    pub name: ManifestName,

    /// Directories whose contents feed the build
    pub watched_roots: Vec<PathBuf>,

    /// Paths whose change invalidates this definition
    pub config_matcher: ConfigMatcher,

    /// Image this manifest builds; also used for image reaping
    pub image_ref: ImageRef,

    /// Deploy spec, opaque to the engine
    pub deploy_yaml: String,
}

impl Manifest {
    pub fn new(name: impl Into<ManifestName>, image_ref: ImageRef) -> Self {
        Self {
            name: name.into(),
            watched_roots: Vec::new(),
            config_matcher: ConfigMatcher::default(),
            image_ref,
            deploy_yaml: String::new(),
        }
    }

    /// Set the watched roots
    pub fn with_watched_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.watched_roots = roots;
        self
    }

    /// Set the config matcher
    pub fn with_config_matcher(mut self, matcher: ConfigMatcher) -> Self {
        self.config_matcher = matcher;
        self
    }

    /// Set the deploy spec
    pub fn with_deploy_yaml(mut self, yaml: impl Into<String>) -> Self {
        self.deploy_yaml = yaml.into();
        self
    }
}

impl From<String> for ManifestName {
    fn from(s: String) -> Self {
        Self(s)
    }
}
