//! In-memory container runtime double driven by the test body.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use reelkeeper::runtime::{
    ContainerRuntime, ContainerState, EventFilter, EventKind, EventStream, LabelFilter,
    LifecycleEvent, RuntimeError,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    labels: HashMap<String, String>,
    running: bool,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    destroyed: HashSet<String>,
    unreachable: bool,
    broken_events: bool,
    closed_events: bool,
    calls: Vec<String>,
}

/// Runtime double: containers are added, exited and destroyed by the test.
pub struct FakeRuntime {
    state: Mutex<State>,
    changes: watch::Sender<u64>,
    destroys: broadcast::Sender<String>,
}

impl FakeRuntime {
    /// Empty, reachable runtime.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        let (destroys, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            changes,
            destroys,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake runtime state lock")
    }

    /// Add a running container carrying one label.
    pub fn add_container(&self, id: &str, label_key: &str, label_value: &str) {
        let container = FakeContainer {
            labels: HashMap::from([(label_key.to_owned(), label_value.to_owned())]),
            running: true,
        };
        self.lock().containers.insert(id.to_owned(), container);
    }

    /// Stop a container's process without removing it.
    pub fn exit(&self, id: &str) {
        if let Some(container) = self.lock().containers.get_mut(id) {
            container.running = false;
        }
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Remove a container and emit its destroy event.
    pub fn destroy(&self, id: &str) {
        {
            let mut state = self.lock();
            state.containers.remove(id);
            state.destroyed.insert(id.to_owned());
            let _ = self.destroys.send(id.to_owned());
        }
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Make every call fail as if the daemon were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make event subscriptions yield an API error.
    pub fn break_events(&self) {
        self.lock().broken_events = true;
    }

    /// Make event subscriptions end without yielding anything.
    pub fn close_events(&self) {
        self.lock().closed_events = true;
    }

    /// Calls received so far, as `method:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn record_call(&self, call: String) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.unreachable {
            return Err(RuntimeError::Connection("daemon down".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.record_call("ping".to_owned())
    }

    async fn list_by_label(&self, filter: &LabelFilter) -> Result<Vec<String>, RuntimeError> {
        self.record_call(format!("list:{filter}"))?;
        let state = self.lock();
        let mut ids: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.labels.get(&filter.key) == Some(&filter.value))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        self.record_call(format!("inspect:{container_id}"))?;
        let state = self.lock();
        match state.containers.get(container_id) {
            Some(c) => Ok(ContainerState {
                id: container_id.to_owned(),
                running: c.running,
                status: Some(if c.running { "running" } else { "exited" }.to_owned()),
            }),
            None => Err(RuntimeError::NotFound(container_id.to_owned())),
        }
    }

    async fn wait_exit(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record_call(format!("wait:{container_id}"))?;
        let mut changes = self.changes.subscribe();
        loop {
            {
                let state = self.lock();
                match state.containers.get(container_id) {
                    None => return Err(RuntimeError::NotFound(container_id.to_owned())),
                    Some(c) if !c.running => return Ok(()),
                    Some(_) => {}
                }
            }
            if changes.changed().await.is_err() {
                return Err(RuntimeError::Connection("runtime dropped".to_owned()));
            }
        }
    }

    fn events(&self, filter: &EventFilter) -> EventStream {
        let mut state = self.lock();
        state.calls.push(format!("events:{}", filter.container_id));

        if state.unreachable {
            return Box::pin(tokio_stream::once(Err::<LifecycleEvent, _>(RuntimeError::Connection(
                "daemon down".to_owned(),
            ))));
        }
        if state.broken_events {
            return Box::pin(tokio_stream::once(Err::<LifecycleEvent, _>(RuntimeError::Api(
                "event stream failed".to_owned(),
            ))));
        }
        if state.closed_events {
            return Box::pin(tokio_stream::empty::<Result<LifecycleEvent, RuntimeError>>());
        }

        let id = filter.container_id.clone();
        let kind = filter.kind;
        // Subscribe under the lock so no destroy slips between replay and live.
        let receiver = self.destroys.subscribe();
        let replay =
            filter.since.is_some() && kind == EventKind::Destroy && state.destroyed.contains(&id);

        let live_id = id.clone();
        let live = BroadcastStream::new(receiver).filter_map(
            move |item| -> Option<Result<LifecycleEvent, RuntimeError>> {
                match item {
                    Ok(destroyed) if destroyed == live_id && kind == EventKind::Destroy => {
                        Some(Ok(LifecycleEvent {
                            container_id: destroyed,
                            kind,
                        }))
                    }
                    _ => None,
                }
            },
        );

        if replay {
            let replayed = tokio_stream::once(Ok::<_, RuntimeError>(LifecycleEvent {
                container_id: id,
                kind,
            }));
            Box::pin(replayed.chain(live))
        } else {
            Box::pin(live)
        }
    }
}
