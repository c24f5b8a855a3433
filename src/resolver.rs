//! Maps a per-test execution id to the grid container carrying its label.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::record::ExecutionId;
use crate::runtime::{ContainerRuntime, LabelFilter};

/// Label-based container lookup.
///
/// Resolution never fails from the caller's point of view: a missing match or
/// an unreachable runtime both degrade to "unknown container".
#[derive(Clone)]
pub struct ContainerResolver {
    runtime: Arc<dyn ContainerRuntime>,
    label_key: String,
}

impl ContainerResolver {
    /// Create a resolver matching containers on `label_key=<execution id>`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, label_key: impl Into<String>) -> Self {
        Self {
            runtime,
            label_key: label_key.into(),
        }
    }

    /// Label key used for lookups.
    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Return the first container (running or stopped) labeled with this id.
    pub async fn resolve(&self, execution_id: &ExecutionId) -> Option<String> {
        let filter = LabelFilter::new(self.label_key.clone(), execution_id.as_str());
        match self.runtime.list_by_label(&filter).await {
            Ok(ids) => {
                let found = ids.into_iter().find(|id| !id.is_empty());
                match &found {
                    Some(id) => debug!(label = %filter, container_id = %id, "container resolved"),
                    None => debug!(label = %filter, "no container carries label"),
                }
                found
            }
            Err(e) => {
                warn!(label = %filter, error = %e, "container label query failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for ContainerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerResolver")
            .field("label_key", &self.label_key)
            .finish_non_exhaustive()
    }
}
