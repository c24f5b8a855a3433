//! Retention policy: maps a test outcome to a keep/delete decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::record::VideoAction;

/// Configured rule for which videos survive the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionMode {
    /// Keep every video.
    Always,
    /// Never record; nothing to keep.
    Never,
    /// Keep videos of failed tests only.
    #[default]
    OnFailure,
    /// Keep videos of passed tests only.
    OnSuccess,
}

/// Error returned for an unrecognised retention mode string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown retention mode {0:?} (expected always, never, on_failure or on_success)")]
pub struct ParseRetentionModeError(pub String);

impl FromStr for RetentionMode {
    type Err = ParseRetentionModeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "always" | "true" => Ok(Self::Always),
            "never" | "false" => Ok(Self::Never),
            "on_failure" => Ok(Self::OnFailure),
            "on_success" => Ok(Self::OnSuccess),
            _ => Err(ParseRetentionModeError(raw.to_owned())),
        }
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::OnFailure => "on_failure",
            Self::OnSuccess => "on_success",
        };
        f.write_str(name)
    }
}

impl Serialize for RetentionMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RetentionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Decide what to do with a test's video.
pub fn decide(mode: RetentionMode, passed: bool) -> VideoAction {
    let keep = match mode {
        RetentionMode::Always => true,
        RetentionMode::Never => false,
        RetentionMode::OnFailure => !passed,
        RetentionMode::OnSuccess => passed,
    };
    if keep {
        VideoAction::Keep
    } else {
        VideoAction::Delete
    }
}

/// Whether the grid should record at all under this mode.
///
/// The outcome is unknown when the session starts, so every mode that might
/// keep a video has to record.
pub fn records_video(mode: RetentionMode) -> bool {
    mode != RetentionMode::Never
}
