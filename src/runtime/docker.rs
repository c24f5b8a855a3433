//! Docker-backed container runtime using the bollard API.

use std::collections::HashMap;

use bollard::container::{InspectContainerOptions, ListContainersOptions, WaitContainerOptions};
use bollard::errors::Error as BollardError;
use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::Docker;
use tokio_stream::StreamExt;

use super::{
    ContainerRuntime, ContainerState, EventFilter, EventKind, EventStream, LabelFilter,
    LifecycleEvent, RuntimeError,
};

/// Docker daemon connection used for read-only container observation.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using local defaults (`DOCKER_HOST` or the local socket).
    ///
    /// The connection is lazy; an unreachable daemon surfaces on first request.
    ///
    /// # Errors
    ///
    /// Returns an error when the client cannot be configured.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wrap an existing bollard client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(map_error)?;
        Ok(())
    }

    async fn list_by_label(&self, filter: &LabelFilter) -> Result<Vec<String>, RuntimeError> {
        let options = Some(ListContainersOptions {
            all: true,
            filters: HashMap::from([("label".to_owned(), vec![filter.to_string()])]),
            ..Default::default()
        });

        let containers = self
            .docker
            .list_containers(options)
            .await
            .map_err(map_error)?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match map_error(e) {
                RuntimeError::NotFound(_) => RuntimeError::NotFound(container_id.to_owned()),
                other => other,
            })?;

        let state = inspect.state;
        let running = state
            .as_ref()
            .and_then(|value| value.running)
            .unwrap_or(false);
        let status = state
            .and_then(|value| value.status)
            .map(|status| status.to_string());

        Ok(ContainerState {
            id: inspect.id.unwrap_or_else(|| container_id.to_owned()),
            running,
            status,
        })
    }

    async fn wait_exit(&self, container_id: &str) -> Result<(), RuntimeError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut stream = Box::pin(self.docker.wait_container(container_id, options));

        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => return Ok(()),
                // A non-zero exit code still means the process has stopped.
                Err(BollardError::DockerContainerWaitError { .. }) => return Ok(()),
                Err(e) => {
                    return Err(match map_error(e) {
                        RuntimeError::NotFound(_) => {
                            RuntimeError::NotFound(container_id.to_owned())
                        }
                        other => other,
                    })
                }
            }
        }
        Ok(())
    }

    fn events(&self, filter: &EventFilter) -> EventStream {
        let options = EventsOptions::<String> {
            since: filter.since.map(|at| at.timestamp().to_string()),
            filters: HashMap::from([
                ("type".to_owned(), vec!["container".to_owned()]),
                ("container".to_owned(), vec![filter.container_id.clone()]),
                ("event".to_owned(), vec![filter.kind.as_str().to_owned()]),
            ]),
            ..Default::default()
        };

        let requested = filter.clone();
        let stream = self
            .docker
            .events(Some(options))
            .filter_map(move |item| match item {
                Ok(message) => decode_event(message, &requested).map(Ok),
                Err(e) => Some(Err(map_error(e))),
            });
        Box::pin(stream)
    }
}

/// Keep only events of the requested kind; the daemon filter is advisory.
fn decode_event(message: EventMessage, filter: &EventFilter) -> Option<LifecycleEvent> {
    let kind = message.action.as_deref().and_then(EventKind::from_action)?;
    if kind != filter.kind {
        return None;
    }
    let container_id = message
        .actor
        .and_then(|actor| actor.id)
        .unwrap_or_else(|| filter.container_id.clone());
    Some(LifecycleEvent { container_id, kind })
}

fn map_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api(format!("{status_code}: {message}")),
        other => RuntimeError::Connection(other.to_string()),
    }
}
