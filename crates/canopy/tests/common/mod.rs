//! Shared harness for coordinator integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canopy::channel::memory::{MemoryConnector, MemoryPeer, MemoryServer};
use canopy::{
    CoordinatorConfig, CoordinatorHandle, CoordinatorRuntime, CoordinatorView, ProjectSource,
    SourceError, UiEvent,
};
use canopy_protocol::ProjectSnapshot;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Project source backed by an in-memory list.
#[derive(Default)]
pub struct StaticSource {
    projects: Mutex<Vec<ProjectSnapshot>>,
    fetches: AtomicUsize,
    failing: bool,
}

impl StaticSource {
    pub fn new(projects: Value) -> Arc<Self> {
        Arc::new(Self {
            projects: Mutex::new(serde_json::from_value(projects).unwrap()),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    pub fn set(&self, projects: Value) {
        *self.projects.lock().unwrap() = serde_json::from_value(projects).unwrap();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectSource for StaticSource {
    async fn fetch_projects(&self) -> Result<Vec<ProjectSnapshot>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(SourceError::Unavailable("offline".to_string()));
        }
        Ok(self.projects.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub handle: CoordinatorHandle,
    pub server: MemoryServer,
    pub events: broadcast::Receiver<UiEvent>,
    pub task: JoinHandle<()>,
}

impl Harness {
    /// Start a coordinator whose first connection attempt is refused.
    pub fn start(source: Option<Arc<dyn ProjectSource>>) -> Self {
        let (connector, server) = MemoryConnector::new();
        Self::spawn(connector, server, source)
    }

    /// Start a coordinator whose first connection attempt succeeds.
    pub fn start_connected(source: Option<Arc<dyn ProjectSource>>) -> (Self, MemoryPeer) {
        let (connector, server) = MemoryConnector::new();
        let peer = server.accept_next();
        (Self::spawn(connector, server, source), peer)
    }

    fn spawn(
        connector: MemoryConnector,
        server: MemoryServer,
        source: Option<Arc<dyn ProjectSource>>,
    ) -> Self {
        let (runtime, handle) =
            CoordinatorRuntime::new(CoordinatorConfig::default(), Arc::new(connector), source);
        let events = handle.subscribe();
        let task = tokio::spawn(runtime.run());
        Self {
            handle,
            server,
            events,
            task,
        }
    }

    pub async fn view(&self) -> CoordinatorView {
        self.handle.view().await.expect("coordinator stopped")
    }

    /// Everything emitted since the last drain.
    pub fn drain(&mut self) -> Vec<UiEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Let every task run until idle. Only meaningful with a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn session(id: &str, updated_at: &str) -> Value {
    json!({
        "id": id,
        "summary": format!("about {id}"),
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": updated_at,
        "messageCount": 3
    })
}

pub fn project(name: &str, sessions: Vec<Value>) -> Value {
    json!({
        "name": name,
        "displayName": name,
        "fullPath": format!("/home/dev/{name}"),
        "sessions": sessions
    })
}

pub fn projects_updated(projects: Vec<Value>, changed_file: Option<&str>) -> Value {
    let mut message = json!({
        "type": "projects_updated",
        "projects": projects,
    });
    if let Some(changed_file) = changed_file {
        message["changedFile"] = json!(changed_file);
    }
    message
}

pub fn loading(phase: &str) -> Value {
    json!({
        "type": "loading_progress",
        "phase": phase,
        "current": 1,
        "total": 2
    })
}

/// `updated_at` of a session in the coordinator's current project list.
pub fn updated_at(view: &CoordinatorView, project: &str, session: &str) -> Option<String> {
    view.projects
        .iter()
        .find(|p| p.name == project)?
        .sessions
        .iter()
        .find(|s| s.id == session)?
        .updated_at
        .clone()
}

pub fn with_source(source: &Arc<StaticSource>) -> Option<Arc<dyn ProjectSource>> {
    Some(Arc::clone(source) as Arc<dyn ProjectSource>)
}
