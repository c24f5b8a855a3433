//! Blocks until a grid container has been fully removed from the runtime.
//!
//! The grid removes a browser container only after it has finished flushing
//! the session video to disk, so the container's `destroy` event is the
//! authoritative "video complete" signal. The waiter observes it instead of
//! polling or sleeping:
//!
//! ```text
//! Unknown --inspect--> Exists --wait exit--> Exited --destroy event--> Destroyed
//!    \___________________ not found at any step __________________/
//! ```
//!
//! Failures other than not-found are logged and the wait gives up; cleanup
//! must keep making progress when the runtime connection is flaky.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::record::short_id;
use crate::runtime::{ContainerRuntime, EventFilter, EventKind, RuntimeError};

/// Lifecycle phase of an observed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPhase {
    /// Not yet queried.
    Unknown,
    /// Present in the runtime.
    Exists,
    /// Process stopped; container not yet removed.
    Exited,
    /// Removed from the runtime. Terminal.
    Destroyed,
}

impl fmt::Display for ContainerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Exists => "exists",
            Self::Exited => "exited",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No container id was given; nothing to wait for.
    Skipped,
    /// The container was already gone when first queried.
    AlreadyGone,
    /// The destroy signal was observed (or the container vanished mid-wait).
    Destroyed,
    /// A runtime error cut the wait short.
    Degraded,
    /// The configured wait cap expired.
    TimedOut,
}

impl WaitOutcome {
    /// Returns `true` when the container is known to be gone.
    pub fn is_destroyed(self) -> bool {
        matches!(self, Self::AlreadyGone | Self::Destroyed)
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Skipped => "skipped",
            Self::AlreadyGone => "already_gone",
            Self::Destroyed => "destroyed",
            Self::Degraded => "degraded",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Event-driven destruction waiter.
#[derive(Clone)]
pub struct DestructionWaiter {
    runtime: Arc<dyn ContainerRuntime>,
    max_wait: Option<Duration>,
}

impl DestructionWaiter {
    /// Create an unbounded waiter.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            max_wait: None,
        }
    }

    /// Cap every wait at `max_wait`. `None` keeps waits unbounded.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Runtime handle shared with the waiter.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Block until the container is destroyed. Never returns an error.
    pub async fn block_until_destroyed(&self, container_id: Option<&str>) -> WaitOutcome {
        let Some(id) = container_id.filter(|id| !id.is_empty()) else {
            return WaitOutcome::Skipped;
        };

        let outcome = match self.max_wait {
            Some(limit) => match tokio::time::timeout(limit, self.observe(id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        container_id = %short_id(id),
                        seconds = limit.as_secs(),
                        "gave up waiting for container removal"
                    );
                    WaitOutcome::TimedOut
                }
            },
            None => self.observe(id).await,
        };

        info!(container_id = %short_id(id), outcome = %outcome, "container wait finished");
        outcome
    }

    async fn observe(&self, id: &str) -> WaitOutcome {
        // Replay window start for the destroy subscription.
        let since = Utc::now();
        let mut phase = ContainerPhase::Unknown;

        match self.runtime.inspect(id).await {
            Ok(_) => advance(id, &mut phase, ContainerPhase::Exists),
            Err(RuntimeError::NotFound(_)) => {
                advance(id, &mut phase, ContainerPhase::Destroyed);
                return WaitOutcome::AlreadyGone;
            }
            Err(e) => return degraded(id, phase, &e),
        }

        info!(container_id = %short_id(id), "awaiting container removal");

        match self.runtime.wait_exit(id).await {
            Ok(()) => advance(id, &mut phase, ContainerPhase::Exited),
            Err(RuntimeError::NotFound(_)) => {
                advance(id, &mut phase, ContainerPhase::Destroyed);
                return WaitOutcome::Destroyed;
            }
            Err(e) => return degraded(id, phase, &e),
        }

        let filter = EventFilter {
            container_id: id.to_owned(),
            kind: EventKind::Destroy,
            since: Some(since),
        };
        let mut events = self.runtime.events(&filter);

        while let Some(item) = events.next().await {
            match item {
                Ok(event) if event.kind == EventKind::Destroy => {
                    advance(id, &mut phase, ContainerPhase::Destroyed);
                    return WaitOutcome::Destroyed;
                }
                Ok(event) => {
                    debug!(container_id = %short_id(id), kind = event.kind.as_str(), "ignoring event");
                }
                Err(RuntimeError::NotFound(_)) => {
                    advance(id, &mut phase, ContainerPhase::Destroyed);
                    return WaitOutcome::Destroyed;
                }
                Err(e) => return degraded(id, phase, &e),
            }
        }

        warn!(
            container_id = %short_id(id),
            phase = %phase,
            "event stream closed before destroy signal"
        );
        WaitOutcome::Degraded
    }
}

impl fmt::Debug for DestructionWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestructionWaiter")
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

fn advance(id: &str, phase: &mut ContainerPhase, next: ContainerPhase) {
    debug!(container_id = %short_id(id), from = %phase, to = %next, "container phase");
    *phase = next;
}

fn degraded(id: &str, phase: ContainerPhase, err: &RuntimeError) -> WaitOutcome {
    warn!(
        container_id = %short_id(id),
        phase = %phase,
        error = %err,
        "container wait failed, continuing without it"
    );
    WaitOutcome::Degraded
}
