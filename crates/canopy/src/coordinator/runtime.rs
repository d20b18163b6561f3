//! Coordinator event loop.
//!
//! One task owns the coordinator, the router and the channel supervisor, and
//! takes one event at a time from: the push channel, UI commands, finished
//! project fetches and the progress clear timer. Nothing else touches their
//! state, so no locking is needed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use canopy_protocol::{ClientCommand, LoadingProgress, ProjectSnapshot, SessionId};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::instrument;

use super::{Coordinator, UiEvent};
use crate::channel::{ChannelEvent, ChannelSupervisor, ConnectionState, Connector};
use crate::error::{ChannelError, SourceError};
use crate::router::{DEFAULT_PROGRESS_CLEAR_DELAY, MessageRouter};
use crate::selection::Selection;
use crate::source::ProjectSource;

type FetchResult = Result<Vec<ProjectSnapshot>, SourceError>;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub reconnect_delay: Duration,
    pub progress_clear_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: crate::channel::supervisor::DEFAULT_RECONNECT_DELAY,
            progress_clear_delay: DEFAULT_PROGRESS_CLEAR_DELAY,
        }
    }
}

/// Read-only copy of coordinator state.
#[derive(Debug, Clone)]
pub struct CoordinatorView {
    pub selection: Selection,
    pub projects: Arc<Vec<ProjectSnapshot>>,
    pub active: HashSet<SessionId>,
    pub processing: HashSet<SessionId>,
    pub progress: Option<LoadingProgress>,
    pub external_changes: u64,
    pub connection: ConnectionState,
}

impl From<&Coordinator> for CoordinatorView {
    fn from(coordinator: &Coordinator) -> Self {
        Self {
            selection: coordinator.selection().clone(),
            projects: Arc::clone(coordinator.projects()),
            active: coordinator.registry().active().cloned().collect(),
            processing: coordinator.registry().processing().cloned().collect(),
            progress: coordinator.progress().cloned(),
            external_changes: coordinator.external_change_count(),
            connection: coordinator.connection(),
        }
    }
}

#[derive(Debug)]
enum Command {
    SelectProject(Option<String>),
    SelectSession { project: String, session: SessionId },
    UserSentMessage(SessionId),
    ConversationSettled(SessionId),
    ResponseStarted(SessionId),
    ResponseFinished(SessionId),
    RealSessionAssigned(String),
    Refresh,
    Send(String),
    View(oneshot::Sender<CoordinatorView>),
    Shutdown,
}

/// UI-facing handle. Cheap to clone; every call is queued for the event loop.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<UiEvent>,
}

impl CoordinatorHandle {
    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Coordinator stopped, dropping command");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn select_project(&self, project: Option<String>) {
        self.command(Command::SelectProject(project));
    }

    pub fn select_session(&self, project: impl Into<String>, session: SessionId) {
        self.command(Command::SelectSession {
            project: project.into(),
            session,
        });
    }

    /// The user sent a message in `id`; protect it.
    pub fn user_sent_message(&self, id: SessionId) {
        self.command(Command::UserSentMessage(id));
    }

    /// The conversation in `id` settled (complete or aborted); stop protecting it.
    pub fn conversation_settled(&self, id: SessionId) {
        self.command(Command::ConversationSettled(id));
    }

    pub fn response_started(&self, id: SessionId) {
        self.command(Command::ResponseStarted(id));
    }

    pub fn response_finished(&self, id: SessionId) {
        self.command(Command::ResponseFinished(id));
    }

    /// The backend assigned `real_id` to the conversation started under a placeholder.
    pub fn real_session_assigned(&self, real_id: impl Into<String>) {
        self.command(Command::RealSessionAssigned(real_id.into()));
    }

    /// Re-fetch the project list.
    pub fn refresh(&self) {
        self.command(Command::Refresh);
    }

    /// Send a payload over the push channel. Dropped (with a diagnostic) if
    /// the channel is not open when the event loop gets to it.
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(payload)?;
        self.command(Command::Send(text));
        Ok(())
    }

    pub fn abort_session(&self, session_id: impl Into<String>) -> Result<(), ChannelError> {
        self.send(&ClientCommand::AbortSession {
            session_id: session_id.into(),
        })
    }

    /// Current state, or `None` once the coordinator stopped.
    pub async fn view(&self) -> Option<CoordinatorView> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::View(tx));
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }
}

pub struct CoordinatorRuntime {
    coordinator: Coordinator,
    router: MessageRouter,
    supervisor: ChannelSupervisor,
    channel_events: mpsc::Receiver<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    source: Option<Arc<dyn ProjectSource>>,
    fetched_tx: mpsc::UnboundedSender<FetchResult>,
    fetched_rx: mpsc::UnboundedReceiver<FetchResult>,
    refreshing: bool,
}

impl CoordinatorRuntime {
    /// Build the coordinator and start connecting. Must be called inside a
    /// tokio runtime.
    pub fn new(
        config: CoordinatorConfig,
        connector: Arc<dyn Connector>,
        source: Option<Arc<dyn ProjectSource>>,
    ) -> (Self, CoordinatorHandle) {
        let coordinator = Coordinator::new();
        let (supervisor, channel_events) =
            ChannelSupervisor::start(connector, config.reconnect_delay);
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();

        let handle = CoordinatorHandle {
            commands: command_tx,
            events: coordinator.event_sender(),
        };

        (
            Self {
                coordinator,
                router: MessageRouter::new(config.progress_clear_delay),
                supervisor,
                channel_events,
                commands,
                source,
                fetched_tx,
                fetched_rx,
                refreshing: false,
            },
            handle,
        )
    }

    /// Process events until shutdown or until every handle is dropped.
    #[instrument(name = "coordinator", skip_all)]
    pub async fn run(mut self) {
        info!("Coordinator started");
        self.start_refresh();

        loop {
            let deadline = self.router.clear_deadline();
            tokio::select! {
                event = self.channel_events.recv() => match event {
                    Some(event) => self.on_channel_event(event),
                    None => {
                        debug!("Push channel stopped");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(fetched) = self.fetched_rx.recv() => self.on_fetched(fetched),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.router.fire_due(Instant::now()) {
                        self.coordinator.clear_progress();
                    }
                }
            }
        }

        self.router.cancel_clear();
        // Unblock a supervisor waiting for event buffer space.
        self.channel_events.close();
        self.supervisor.close().await;
        self.coordinator
            .on_connection_changed(ConnectionState::Disconnected);
        info!("Coordinator stopped");
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.coordinator
                    .on_connection_changed(ConnectionState::Connected);
                self.query_status();
            }
            ChannelEvent::Disconnected => {
                self.coordinator
                    .on_connection_changed(ConnectionState::Disconnected);
            }
            ChannelEvent::Message(raw) => {
                if let Some(routed) = self.router.route(&raw, Instant::now()) {
                    self.coordinator.handle(routed);
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SelectProject(project) => self.coordinator.select_project(project),
            Command::SelectSession { project, session } => {
                self.coordinator.select_session(project, session);
                self.query_status();
            }
            Command::UserSentMessage(id) => self.coordinator.on_user_sent_message(id),
            Command::ConversationSettled(id) => self.coordinator.on_conversation_settled(&id),
            Command::ResponseStarted(id) => self.coordinator.on_response_started(id),
            Command::ResponseFinished(id) => self.coordinator.on_response_finished(&id),
            Command::RealSessionAssigned(real_id) => {
                self.coordinator.on_real_session_assigned(real_id)
            }
            Command::Refresh => self.start_refresh(),
            Command::Send(text) => {
                self.supervisor.send_text(text);
            }
            Command::View(reply) => {
                let _ = reply.send(CoordinatorView::from(&self.coordinator));
            }
            // Handled by the loop.
            Command::Shutdown => {}
        }
    }

    fn query_status(&self) {
        if self.supervisor.state() != ConnectionState::Connected {
            return;
        }
        if let Some(query) = self.coordinator.status_query() {
            self.supervisor.send(&query);
        }
    }

    /// Fetch the project list in the background. A fetch already in flight
    /// absorbs further requests.
    fn start_refresh(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        if self.refreshing {
            debug!("Project refresh already in flight");
            return;
        }
        self.refreshing = true;

        let tx = self.fetched_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(source.fetch_projects().await);
        });
    }

    fn on_fetched(&mut self, fetched: FetchResult) {
        self.refreshing = false;
        match fetched {
            Ok(projects) => {
                debug!("Fetched {} project(s)", projects.len());
                self.coordinator.replace_projects(projects);
            }
            Err(e) => warn!("Project refresh failed: {}", e),
        }
    }
}
