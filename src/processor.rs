//! Session-end batch cleanup.
//!
//! Runs once per test session in the coordinating process. Every referenced
//! container is awaited before any file is touched; that barrier is what
//! guarantees no video is still being written when it is attached or deleted.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::manifest::ManifestStore;
use crate::record::{ExecutionRecord, VideoAction};
use crate::report::{AttachOutcome, ReportDirectory};
use crate::waiter::DestructionWaiter;

/// Which process is asking for cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// The single process responsible for session-end cleanup.
    Coordinator,
    /// One of several parallel test workers; never runs cleanup.
    Worker,
}

impl ProcessRole {
    /// Map the test framework's "is this a worker" signal.
    pub fn from_worker_flag(is_worker: bool) -> Self {
        if is_worker {
            Self::Worker
        } else {
            Self::Coordinator
        }
    }
}

/// Counts reported at the end of a cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    /// Well-formed manifest records processed.
    pub records: usize,
    /// Distinct containers waited on.
    pub containers_awaited: usize,
    /// Videos newly attached to a result file.
    pub attached: usize,
    /// Videos whose result file already referenced them.
    pub already_attached: usize,
    /// Keep records with no matching result file.
    pub unmatched: usize,
    /// Video files removed.
    pub deleted: usize,
    /// Delete records whose file did not exist.
    pub missing: usize,
    /// Actions that failed on I/O.
    pub failed: usize,
}

/// Orchestrates the wait barrier and the keep/delete actions.
#[derive(Debug, Clone)]
pub struct BatchPostProcessor {
    manifest: ManifestStore,
    waiter: DestructionWaiter,
    reports: ReportDirectory,
    video_dir: PathBuf,
}

impl BatchPostProcessor {
    /// Assemble a processor from its collaborators.
    pub fn new(
        manifest: ManifestStore,
        waiter: DestructionWaiter,
        reports: ReportDirectory,
        video_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manifest,
            waiter,
            reports,
            video_dir: video_dir.into(),
        }
    }

    /// Process and consume the manifest.
    ///
    /// Returns `None` when called from a worker or when no manifest is
    /// pending. Never returns an error: failures are logged and counted.
    pub async fn run(&self, role: ProcessRole) -> Option<CleanupSummary> {
        if role == ProcessRole::Worker {
            debug!("worker process, skipping video cleanup");
            return None;
        }
        if !self.manifest.exists() {
            debug!(path = %self.manifest.path().display(), "no cleanup manifest");
            return None;
        }

        info!(path = %self.manifest.path().display(), "video post-processing started");

        let records = match self.manifest.read_all() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "cannot read cleanup manifest, leaving it for a later run");
                return None;
            }
        };

        let mut summary = CleanupSummary {
            records: records.len(),
            ..Default::default()
        };

        let containers: BTreeSet<&str> = records
            .iter()
            .filter_map(ExecutionRecord::container)
            .collect();
        summary.containers_awaited = self.await_containers(&containers).await;

        let keeps = records.iter().any(|r| r.action == VideoAction::Keep);
        if keeps && !self.attachments_resolve() {
            warn!(
                video_dir = %self.video_dir.display(),
                results_dir = %self.reports.dir().display(),
                "videos live outside the results directory, attached links will not resolve"
            );
        }

        for record in &records {
            self.apply(record, &mut summary);
        }

        if let Err(e) = self.manifest.clear() {
            warn!(error = %e, "failed to remove cleanup manifest");
        }

        info!(
            attached = summary.attached,
            deleted = summary.deleted,
            "video post-processing done"
        );
        Some(summary)
    }

    /// Whether attached video names resolve inside the results directory.
    ///
    /// Report viewers look attachment sources up next to the result files,
    /// so kept videos only link correctly when both directories coincide.
    pub fn attachments_resolve(&self) -> bool {
        self.video_dir == self.reports.dir()
    }

    async fn await_containers(&self, containers: &BTreeSet<&str>) -> usize {
        if containers.is_empty() {
            return 0;
        }
        if let Err(e) = self.waiter.runtime().ping().await {
            warn!(
                error = %e,
                containers = ?containers,
                "container runtime unreachable, skipping destruction waits"
            );
            return 0;
        }
        for id in containers {
            self.waiter.block_until_destroyed(Some(*id)).await;
        }
        containers.len()
    }

    fn apply(&self, record: &ExecutionRecord, summary: &mut CleanupSummary) {
        let Some(video) = record.video_file() else {
            debug!(node_id = %record.node_id, "record has no video");
            return;
        };

        match record.action {
            VideoAction::Keep => match self.reports.attach_video(&record.node_id, video) {
                Ok(AttachOutcome::Attached(path)) => {
                    debug!(video, path = %path.display(), "video attached");
                    summary.attached = summary.attached.saturating_add(1);
                }
                Ok(AttachOutcome::AlreadyAttached(_)) => {
                    summary.already_attached = summary.already_attached.saturating_add(1);
                }
                Ok(AttachOutcome::NoMatch) => {
                    summary.unmatched = summary.unmatched.saturating_add(1);
                }
                Ok(AttachOutcome::Unattachable(path)) => {
                    warn!(video, path = %path.display(), "matched result cannot take attachments");
                    summary.failed = summary.failed.saturating_add(1);
                }
                Err(e) => {
                    warn!(video, error = %e, "failed to attach video");
                    summary.failed = summary.failed.saturating_add(1);
                }
            },
            VideoAction::Delete => {
                let path = video_path(&self.video_dir, video);
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "video deleted");
                        summary.deleted = summary.deleted.saturating_add(1);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        summary.missing = summary.missing.saturating_add(1);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to delete video");
                        summary.failed = summary.failed.saturating_add(1);
                    }
                }
            }
        }
    }
}

/// Resolve a manifest video name inside the video directory.
///
/// Only the final path component is used so a record cannot point outside
/// the directory.
fn video_path(video_dir: &Path, video: &str) -> PathBuf {
    let file_name = Path::new(video)
        .file_name()
        .map_or_else(|| video.into(), PathBuf::from);
    video_dir.join(file_name)
}
