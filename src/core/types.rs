//! Core domain type definitions

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use crate::core::manifest::{ImageRef, ManifestName};

// ─────────────────────────────────────────────────────────
// Pods
// ─────────────────────────────────────────────────────────

/// Latest observed pod summary for a manifest.
///
/// A manifest with no observed pod holds `None` in its state; there is no
/// sentinel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    /// Pod name as reported by the cluster
    pub name: String,

    /// Creation timestamp; newest-started pod wins during rollouts
    pub started_at: DateTime<Local>,

    /// Derived status string (e.g. "Running", "CrashLoopBackOff")
    pub status: String,
}

impl Pod {
    pub fn new(
        name: impl Into<String>,
        started_at: DateTime<Local>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            started_at,
            status: status.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Deployed entities and load balancers
// ─────────────────────────────────────────────────────────

/// Cluster object that exposes a deployed workload externally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    /// Name of the exposing service
    pub service_name: String,

    /// Exposed ports
    pub ports: Vec<u16>,
}

/// One object the deployer created or updated in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Object name
    pub name: String,

    /// Load balancer spec, if this entity exposes one
    pub load_balancer: Option<LoadBalancerSpec>,
}

// ─────────────────────────────────────────────────────────
// Build results and build state
// ─────────────────────────────────────────────────────────

/// What a successful build-and-deploy produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildResult {
    /// The image that was built, if any
    pub image: Option<ImageRef>,

    /// Entities applied to the cluster
    pub entities: Vec<Entity>,
}

/// Input to the next build: the last result (if any) plus the files that
/// changed since it. A clean state means "build from scratch".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildState {
    last_result: Option<BuildResult>,
    files_changed: Vec<PathBuf>,
}

impl BuildState {
    /// The state before any build has succeeded
    pub fn clean() -> Self {
        Self::default()
    }

    /// State derived from a successful build result
    pub fn from_result(result: BuildResult) -> Self {
        Self {
            last_result: Some(result),
            files_changed: Vec::new(),
        }
    }

    /// Same provenance, new changed-file set
    pub fn new_state_with_files_changed(&self, files: Vec<PathBuf>) -> Self {
        Self {
            last_result: self.last_result.clone(),
            files_changed: files,
        }
    }

    pub fn last_result(&self) -> Option<&BuildResult> {
        self.last_result.as_ref()
    }

    pub fn files_changed(&self) -> &[PathBuf] {
        &self.files_changed
    }

    /// True when nothing has been built yet
    pub fn is_clean(&self) -> bool {
        self.last_result.is_none()
    }
}

// ─────────────────────────────────────────────────────────
// Log lines
// ─────────────────────────────────────────────────────────

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Get numeric severity value for comparison.
    /// Higher values indicate more severe levels.
    pub fn severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }

    /// Check whether this level is at least as severe as another
    pub fn as_severe_as(&self, other: LogLevel) -> bool {
        self.severity() >= other.severity()
    }
}

/// Identifier of the span a log line belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanId(String);

impl SpanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build spans carry output of the build phase, as opposed to runtime
    /// output of the deployed workload.
    pub fn is_build(&self) -> bool {
        self.0.starts_with("build:") || self.0.starts_with("cmdimage:")
    }
}

/// A single line in the log stream consumed by the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub level: LogLevel,
    pub span_id: SpanId,
    pub manifest_name: Option<ManifestName>,
    /// Non-empty for build boundary markers ("build started"/"build done")
    pub build_event: Option<String>,
}

impl LogLine {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level,
            span_id: SpanId::default(),
            manifest_name: None,
            build_event: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, text)
    }

    pub fn with_span(mut self, span_id: SpanId) -> Self {
        self.span_id = span_id;
        self
    }

    pub fn with_manifest(mut self, name: ManifestName) -> Self {
        self.manifest_name = Some(name);
        self
    }

    pub fn with_build_event(mut self, event: impl Into<String>) -> Self {
        self.build_event = Some(event.into());
        self
    }
}

// ─────────────────────────────────────────────────────────
// Per-build log buffer
// ─────────────────────────────────────────────────────────

/// Buffered output of one build, shared between the engine state and the
/// in-flight build task.
///
/// The dispatcher hands a clone to the build task as its log sink; the task
/// must not reach back into engine state for anything else. At completion
/// the buffer is rotated (current becomes last) and a fresh one is created.
#[derive(Debug, Clone, Default)]
pub struct BuildLog {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line to the buffer
    pub fn append(&self, line: LogLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// Snapshot the buffered lines
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
