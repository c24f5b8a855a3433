//! Test-session lifecycle hooks.
//!
//! The test framework drives these: [`GridCapabilities`] when a browser
//! session starts, [`SessionHooks::on_teardown`] after each test, and
//! [`SessionHooks::on_session_finish`] once the whole run is over.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::VideoConfig;
use crate::manifest::ManifestStore;
use crate::policy::{self, RetentionMode};
use crate::processor::{BatchPostProcessor, CleanupSummary, ProcessRole};
use crate::record::{short_id, ExecutionId, ExecutionRecord};
use crate::resolver::ContainerResolver;

/// Capability key the grid reads its vendor options from.
pub const GRID_OPTIONS_KEY: &str = "selenoid:options";

/// Video file name the grid is asked to produce for a test.
pub fn video_name_for(test_name: &str) -> String {
    format!("{}.mp4", test_name.trim().replace(' ', "_"))
}

/// Vendor options sent to the grid when a browser session is created.
///
/// The execution id label is what lets the resolver find the container later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridCapabilities {
    /// Expose VNC for live viewing.
    #[serde(rename = "enableVNC")]
    pub enable_vnc: bool,
    /// Whether the grid records this session.
    #[serde(rename = "enableVideo")]
    pub enable_video: bool,
    /// Requested video file name; absent when not recording.
    #[serde(rename = "videoName", skip_serializing_if = "Option::is_none")]
    pub video_name: Option<String>,
    /// Recording resolution.
    #[serde(rename = "videoScreenSize")]
    pub video_screen_size: String,
    /// Session display name.
    pub name: String,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
}

impl GridCapabilities {
    /// Build the options for one test execution.
    pub fn new(
        execution_id: &ExecutionId,
        test_name: &str,
        video: &VideoConfig,
        label_key: &str,
    ) -> Self {
        let enable_video = policy::records_video(video.record);
        let mut labels = video.labels.clone();
        labels.insert(label_key.to_owned(), execution_id.to_string());

        Self {
            enable_vnc: video.enable_vnc,
            enable_video,
            video_name: enable_video.then(|| video_name_for(test_name)),
            video_screen_size: video.screen_size.clone(),
            name: test_name.to_owned(),
            labels,
        }
    }

    /// Capability object to merge into the WebDriver session request.
    pub fn to_capability(&self) -> Value {
        json!({ GRID_OPTIONS_KEY: self })
    }
}

/// Facts about a finished test, gathered by the framework at teardown.
#[derive(Debug, Clone)]
pub struct TestTeardown {
    /// Framework node id.
    pub node_id: String,
    /// Short test name.
    pub test_name: String,
    /// Execution id the session's container was labeled with.
    pub execution_id: ExecutionId,
    /// Grid session id, when the driver reported one.
    pub session_id: Option<String>,
    /// Container id already known to the caller; skips label resolution.
    pub container_id: Option<String>,
    /// Video file name; `None` when recording was disabled.
    pub video: Option<String>,
    /// Whether the test body passed.
    pub passed: bool,
}

/// Per-test and per-session hook entry points.
#[derive(Debug, Clone)]
pub struct SessionHooks {
    manifest: ManifestStore,
    resolver: ContainerResolver,
    mode: RetentionMode,
}

impl SessionHooks {
    /// Create hooks writing to `manifest` under the given retention mode.
    pub fn new(manifest: ManifestStore, resolver: ContainerResolver, mode: RetentionMode) -> Self {
        Self {
            manifest,
            resolver,
            mode,
        }
    }

    /// Record the video decision for a finished test.
    ///
    /// Returns the appended record, or `None` when the test had no video or
    /// the append failed. Never returns an error.
    pub async fn on_teardown(&self, teardown: &TestTeardown) -> Option<ExecutionRecord> {
        let video = teardown.video.as_deref().filter(|v| !v.is_empty())?;

        let container_id = match teardown.container_id.as_deref().filter(|c| !c.is_empty()) {
            Some(id) => Some(id.to_owned()),
            None => {
                let resolved = self.resolver.resolve(&teardown.execution_id).await;
                match &resolved {
                    Some(id) => info!(container_id = %short_id(id), "container found by label"),
                    None => warn!(
                        execution_id = %teardown.execution_id,
                        "container could not be found by label"
                    ),
                }
                resolved
            }
        };

        let record = ExecutionRecord {
            node_id: teardown.node_id.clone(),
            test_name: teardown.test_name.clone(),
            session_id: teardown.session_id.clone(),
            container_id,
            video: Some(video.to_owned()),
            action: policy::decide(self.mode, teardown.passed),
        };

        match self.manifest.append(&record) {
            Ok(()) => Some(record),
            Err(e) => {
                warn!(node_id = %record.node_id, error = %e, "failed to record video decision");
                None
            }
        }
    }

    /// Run session-end cleanup unless this process is a parallel worker.
    pub async fn on_session_finish(
        &self,
        processor: &BatchPostProcessor,
        is_worker: bool,
    ) -> Option<CleanupSummary> {
        processor.run(ProcessRole::from_worker_flag(is_worker)).await
    }
}
