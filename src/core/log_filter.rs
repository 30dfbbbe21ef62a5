//! Log filtering for the display layer
//!
//! Pure function over the log-line stream: filters by source kind
//! (build vs runtime), manifest, and severity.

use crate::core::manifest::ManifestName;
use crate::core::types::{LogLevel, LogLine};

/// Which side of the build/runtime split to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterSource {
    /// Show all log sources
    #[default]
    All,
    /// Show only build-span output
    Build,
    /// Show only runtime output of deployed workloads
    Runtime,
}

impl std::fmt::Display for FilterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterSource::All => write!(f, "all"),
            FilterSource::Build => write!(f, "build"),
            FilterSource::Runtime => write!(f, "runtime"),
        }
    }
}

/// Filter over a log-line stream
#[derive(Debug, Clone)]
pub struct LogFilter {
    source: FilterSource,
    manifest_name: Option<ManifestName>,
    level: LogLevel,
}

impl LogFilter {
    pub fn new(source: FilterSource, manifest_name: Option<ManifestName>, level: LogLevel) -> Self {
        Self {
            source,
            manifest_name,
            level,
        }
    }

    /// Below warn the level acts as "show everything"; at warn and above it
    /// is an equality filter, so warnings and errors can be inspected
    /// separately.
    fn matches_level(&self, line: &LogLine) -> bool {
        if !self.level.as_severe_as(LogLevel::Warning) {
            return true;
        }

        self.level == line.level
    }

    /// Check if a line passes the filter
    pub fn matches(&self, line: &LogLine) -> bool {
        if line.build_event.as_deref().is_some_and(|e| !e.is_empty()) {
            // Always leave in build event logs.
            // This makes it easier to see which logs belong to which builds.
            return true;
        }

        if let Some(name) = &self.manifest_name {
            if Some(name) != line.manifest_name.as_ref() {
                return false;
            }
        }

        let is_build = line.span_id.is_build();
        if self.source == FilterSource::Runtime && is_build {
            return false;
        }

        if self.source == FilterSource::Build && !is_build {
            return false;
        }

        self.matches_level(line)
    }

    /// Keep only the lines that pass the filter
    pub fn apply(&self, lines: &[LogLine]) -> Vec<LogLine> {
        lines
            .iter()
            .filter(|line| self.matches(line))
            .cloned()
            .collect()
    }
}
