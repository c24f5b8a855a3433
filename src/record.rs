//! Per-test execution records and the video disposition they carry.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique per-test token used as the browser container's label value.
///
/// Generated fresh for every test invocation and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a new random execution id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an id supplied by the caller (e.g. the test framework).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens to a test's video once its container is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoAction {
    /// Attach the video to the test's report artifact.
    Keep,
    /// Remove the video file from disk.
    Delete,
}

impl fmt::Display for VideoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("keep"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// One manifest line: the disposition decided for a single test's video.
///
/// The field set is the manifest's wire format, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Test framework node id (e.g. `tests/test_login.py::test_locked_user`).
    pub node_id: String,
    /// Short test name.
    pub test_name: String,
    /// Grid session id; informational only.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Container resolved by label lookup, when resolution succeeded.
    #[serde(default)]
    pub container_id: Option<String>,
    /// Video artifact file name produced by the grid.
    #[serde(default)]
    pub video: Option<String>,
    /// Keep or delete, decided once at teardown.
    pub action: VideoAction,
}

impl ExecutionRecord {
    /// Container id, treating an empty string the same as absent.
    pub fn container(&self) -> Option<&str> {
        self.container_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Video file name, treating an empty string the same as absent.
    pub fn video_file(&self) -> Option<&str> {
        self.video.as_deref().filter(|name| !name.is_empty())
    }
}

/// Shorten a container id for log output the way `docker ps` does.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
