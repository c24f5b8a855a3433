//! Container runtime abstraction observed by the cleanup pipeline.
//!
//! The browser grid owns every container; this side only queries, waits and
//! listens. Nothing here creates, starts or removes containers.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_stream::Stream;

pub mod docker;

/// Label equality filter for container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    /// Label key, e.g. `execution_id`.
    pub key: String,
    /// Required label value.
    pub value: String,
}

impl LabelFilter {
    /// Build a `key=value` filter.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Container lifecycle event kinds the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Container process exited.
    Die,
    /// Container fully removed from the runtime.
    Destroy,
}

impl EventKind {
    /// Runtime action name for this event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Die => "die",
            Self::Destroy => "destroy",
        }
    }

    /// Parse a runtime action name.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "die" => Some(Self::Die),
            "destroy" => Some(Self::Destroy),
            _ => None,
        }
    }
}

/// Event subscription scoped to one container and one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Container to watch.
    pub container_id: String,
    /// Event kind to receive.
    pub kind: EventKind,
    /// Replay matching events from this instant before streaming live ones.
    pub since: Option<DateTime<Utc>>,
}

/// A decoded lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Container the event refers to.
    pub container_id: String,
    /// Event kind.
    pub kind: EventKind,
}

/// Snapshot of a container returned by inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    /// Full container id.
    pub id: String,
    /// Whether the container process is still running.
    pub running: bool,
    /// Runtime status string (`running`, `exited`, ...), when reported.
    pub status: Option<String>,
}

/// Errors produced by runtime queries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// The container does not exist (never created or already removed).
    #[error("container not found: {0}")]
    NotFound(String),
    /// The runtime could not be reached.
    #[error("container runtime unreachable: {0}")]
    Connection(String),
    /// The runtime answered with an error.
    #[error("container runtime request failed: {0}")]
    Api(String),
}

impl RuntimeError {
    /// Returns `true` for the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Live stream of decoded lifecycle events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<LifecycleEvent, RuntimeError>> + Send>>;

/// Read-only view of a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// List container ids (running and stopped) carrying the given label.
    async fn list_by_label(&self, filter: &LabelFilter) -> Result<Vec<String>, RuntimeError>;

    /// Inspect one container; [`RuntimeError::NotFound`] when it does not exist.
    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError>;

    /// Block until the container's process is no longer running.
    async fn wait_exit(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Subscribe to lifecycle events matching the filter.
    fn events(&self, filter: &EventFilter) -> EventStream;
}

/// Stand-in used when no runtime client could be configured.
///
/// Every call reports the runtime as unreachable, so resolution yields no
/// container and cleanup skips its waits.
#[derive(Debug, Clone)]
pub struct UnavailableRuntime {
    reason: String,
}

impl UnavailableRuntime {
    /// Create a stand-in carrying the configuration failure.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> RuntimeError {
        RuntimeError::Connection(self.reason.clone())
    }
}

#[async_trait]
impl ContainerRuntime for UnavailableRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Err(self.error())
    }

    async fn list_by_label(&self, _filter: &LabelFilter) -> Result<Vec<String>, RuntimeError> {
        Err(self.error())
    }

    async fn inspect(&self, _container_id: &str) -> Result<ContainerState, RuntimeError> {
        Err(self.error())
    }

    async fn wait_exit(&self, _container_id: &str) -> Result<(), RuntimeError> {
        Err(self.error())
    }

    fn events(&self, _filter: &EventFilter) -> EventStream {
        Box::pin(tokio_stream::once(Err::<LifecycleEvent, _>(self.error())))
    }
}
