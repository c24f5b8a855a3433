//! Allure result files and video attachment injection.
//!
//! Matching a test node id to its result file is a heuristic: first any
//! result whose `fullName` appears in the normalized node id, then any result
//! whose short `name` appears in the raw node id. Similarly named tests can
//! collide; a missed match only means the video is not linked.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, warn};

const RESULT_SUFFIX: &str = "-result.json";
const VIDEO_ATTACHMENT_NAME: &str = "Test Video";
const VIDEO_MIME: &str = "video/mp4";

/// Errors produced while patching a result file.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Filesystem failure.
    #[error("report I/O failed for {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The result document could not be decoded or encoded.
    #[error("invalid result document {path}: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Result of an attachment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The attachment was added to the given file.
    Attached(PathBuf),
    /// The file already references this video.
    AlreadyAttached(PathBuf),
    /// No result file matched the test.
    NoMatch,
    /// The matched file is not a result object; nothing was written.
    Unattachable(PathBuf),
}

/// What [`insert_attachment`] did to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Insertion {
    Added,
    Present,
    NoTarget,
}

/// Which rule selected a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// `fullName` is contained in the normalized node id.
    FullName,
    /// `name` is contained in the node id.
    ShortName,
}

/// Directory of Allure `*-result.json` artifacts.
#[derive(Debug, Clone)]
pub struct ReportDirectory {
    dir: PathBuf,
}

impl ReportDirectory {
    /// Point at a results directory. Nothing is read until used.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Results directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Find the result file for a test node id.
    ///
    /// Unreadable or unparsable files are skipped. A missing directory yields
    /// no match.
    pub fn find_result(&self, node_id: &str) -> Option<(PathBuf, MatchRule)> {
        let documents = self.load_results();
        let normalized = normalize_node_id(node_id);

        let by_full_name = documents.iter().find(|(_, doc)| {
            non_empty_str(doc, "fullName").is_some_and(|full| normalized.contains(full))
        });
        if let Some((path, _)) = by_full_name {
            return Some((path.clone(), MatchRule::FullName));
        }

        documents
            .iter()
            .find(|(_, doc)| non_empty_str(doc, "name").is_some_and(|name| node_id.contains(name)))
            .map(|(path, _)| (path.clone(), MatchRule::ShortName))
    }

    /// Attach a video reference to the matching result file.
    ///
    /// The attachment goes on the last `afters` fixture step when there is
    /// one, otherwise on the result itself. Re-attaching the same video is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the matched file cannot be read, decoded or
    /// rewritten.
    pub fn attach_video(&self, node_id: &str, video: &str) -> Result<AttachOutcome, ReportError> {
        let Some((path, rule)) = self.find_result(node_id) else {
            debug!(node_id, "no result file matches test");
            return Ok(AttachOutcome::NoMatch);
        };
        debug!(node_id, path = %path.display(), rule = ?rule, "result file matched");

        let contents = fs::read_to_string(&path).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        let mut document: Value =
            serde_json::from_str(&contents).map_err(|source| ReportError::Parse {
                path: path.clone(),
                source,
            })?;

        match insert_attachment(&mut document, video) {
            Insertion::Added => {}
            Insertion::Present => return Ok(AttachOutcome::AlreadyAttached(path)),
            Insertion::NoTarget => {
                warn!(path = %path.display(), "result document is not an object");
                return Ok(AttachOutcome::Unattachable(path));
            }
        }

        let rendered =
            serde_json::to_string_pretty(&document).map_err(|source| ReportError::Parse {
                path: path.clone(),
                source,
            })?;
        fs::write(&path, rendered).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(AttachOutcome::Attached(path))
    }

    fn load_results(&self) -> Vec<(PathBuf, Value)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "results directory unreadable");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(RESULT_SUFFIX))
            })
            .collect();
        paths.sort();

        paths
            .into_iter()
            .filter_map(|path| {
                let contents = fs::read_to_string(&path).ok()?;
                match serde_json::from_str::<Value>(&contents) {
                    Ok(doc) => Some((path, doc)),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unparsable result file");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Node ids use `/` and `::`; Allure full names use dots.
pub fn normalize_node_id(node_id: &str) -> String {
    node_id.replace("::", ".").replace('/', ".")
}

fn non_empty_str<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Add the video attachment to the last `afters` step or the document root.
fn insert_attachment(document: &mut Value, video: &str) -> Insertion {
    let has_afters = document
        .get("afters")
        .and_then(Value::as_array)
        .is_some_and(|afters| afters.last().is_some_and(Value::is_object));

    let target = if has_afters {
        document
            .get_mut("afters")
            .and_then(Value::as_array_mut)
            .and_then(|afters| afters.last_mut())
    } else {
        Some(&mut *document)
    };
    let Some(Value::Object(target)) = target else {
        return Insertion::NoTarget;
    };

    let attachments = target
        .entry("attachments")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !attachments.is_array() {
        *attachments = Value::Array(Vec::new());
    }
    let Value::Array(list) = attachments else {
        return Insertion::NoTarget;
    };

    let present = list
        .iter()
        .any(|item| item.get("source").and_then(Value::as_str) == Some(video));
    if present {
        return Insertion::Present;
    }

    list.push(json!({
        "name": VIDEO_ATTACHMENT_NAME,
        "source": video,
        "type": VIDEO_MIME,
    }));
    Insertion::Added
}
