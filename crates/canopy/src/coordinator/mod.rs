//! Live update coordinator.
//!
//! The [`Coordinator`] is the single writer of the selection, the last
//! accepted project list and the protection registry. It is plain
//! synchronous state; [`runtime`] drives it from the push channel, UI
//! commands and timers, one event at a time.

pub mod runtime;

use std::sync::Arc;

use canopy_protocol::{ClientCommand, LoadingProgress, ProjectSnapshot, ProjectsUpdate, SessionId};
use log::{debug, info};
use tokio::sync::broadcast;

use crate::channel::ConnectionState;
use crate::protection::ProtectionRegistry;
use crate::reconcile::{Decision, accept_snapshot, changed_session_id};
use crate::router::Routed;
use crate::selection::Selection;

pub use runtime::{CoordinatorConfig, CoordinatorHandle, CoordinatorRuntime, CoordinatorView};

/// Size of the UI event broadcast buffer.
const UI_EVENT_BUFFER_SIZE: usize = 256;

/// Notifications for dependent views.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ConnectionChanged(ConnectionState),
    /// The project list was replaced.
    ProjectsReplaced(Arc<Vec<ProjectSnapshot>>),
    SelectionChanged(Selection),
    /// `None` hides the indicator.
    ProgressChanged(Option<LoadingProgress>),
    ProcessingChanged {
        session_id: SessionId,
        processing: bool,
    },
    /// The selected session's file changed on disk while it was not active.
    /// Views showing it should reload its content.
    ExternalChange { session_id: String, generation: u64 },
}

pub struct Coordinator {
    selection: Selection,
    projects: Arc<Vec<ProjectSnapshot>>,
    registry: ProtectionRegistry,
    progress: Option<LoadingProgress>,
    external_changes: u64,
    connection: ConnectionState,
    events: broadcast::Sender<UiEvent>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(UI_EVENT_BUFFER_SIZE);
        Self {
            selection: Selection::default(),
            projects: Arc::new(Vec::new()),
            registry: ProtectionRegistry::new(),
            progress: None,
            external_changes: 0,
            connection: ConnectionState::Disconnected,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<UiEvent> {
        self.events.clone()
    }

    fn emit(&self, event: UiEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn projects(&self) -> &Arc<Vec<ProjectSnapshot>> {
        &self.projects
    }

    pub fn registry(&self) -> &ProtectionRegistry {
        &self.registry
    }

    pub fn progress(&self) -> Option<&LoadingProgress> {
        self.progress.as_ref()
    }

    pub fn external_change_count(&self) -> u64 {
        self.external_changes
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    // ========== Protection lifecycle ==========

    pub fn on_user_sent_message(&mut self, id: SessionId) {
        self.registry.mark_active(id);
    }

    pub fn on_conversation_settled(&mut self, id: &SessionId) {
        self.registry.mark_inactive(id);
    }

    pub fn on_response_started(&mut self, id: SessionId) {
        if !self.registry.is_processing(&id) {
            self.registry.mark_processing(id.clone());
            self.emit(UiEvent::ProcessingChanged {
                session_id: id,
                processing: true,
            });
        }
    }

    pub fn on_response_finished(&mut self, id: &SessionId) {
        if self.registry.is_processing(id) {
            self.registry.mark_not_processing(id);
            self.emit(UiEvent::ProcessingChanged {
                session_id: id.clone(),
                processing: false,
            });
        }
    }

    pub fn on_real_session_assigned(&mut self, real_id: impl Into<String>) {
        self.registry.replace_temporary(real_id);
    }

    // ========== Navigation ==========

    /// Select a project, clearing the session.
    pub fn select_project(&mut self, project: Option<String>) {
        self.set_selection(Selection {
            project,
            session: None,
        });
    }

    pub fn select_session(&mut self, project: impl Into<String>, session: SessionId) {
        self.set_selection(Selection::new(project, session));
    }

    fn set_selection(&mut self, selection: Selection) {
        if self.selection != selection {
            self.selection = selection;
            self.emit(UiEvent::SelectionChanged(self.selection.clone()));
        }
    }

    // ========== Channel ==========

    pub fn on_connection_changed(&mut self, state: ConnectionState) {
        if self.connection != state {
            self.connection = state;
            self.emit(UiEvent::ConnectionChanged(state));
        }
    }

    /// Status query to send after (re)connecting, restoring the processing
    /// banner for the selected session.
    pub fn status_query(&self) -> Option<ClientCommand> {
        let session_id = self.selection.session.as_ref()?.as_real()?;
        Some(ClientCommand::CheckSessionStatus {
            session_id: session_id.to_string(),
        })
    }

    /// Apply one routed push message.
    pub fn handle(&mut self, routed: Routed) {
        match routed {
            Routed::Progress(progress) => self.show_progress(progress),
            Routed::ProjectsUpdated(update) => {
                self.on_projects_updated(update);
            }
            Routed::SessionCreated { real_id } => self.on_real_session_assigned(real_id),
            Routed::ResponseSettled {
                session_id,
                aborted,
            } => {
                debug!(
                    "Session {} {}",
                    session_id,
                    if aborted { "aborted" } else { "complete" }
                );
                self.on_conversation_settled(&session_id);
                self.on_response_finished(&session_id);
            }
            Routed::ProcessingStatus {
                session_id,
                processing,
            } => {
                if processing {
                    self.on_response_started(session_id);
                } else {
                    self.on_response_finished(&session_id);
                }
            }
        }
    }

    // ========== Progress ==========

    pub fn show_progress(&mut self, progress: LoadingProgress) {
        self.progress = Some(progress.clone());
        self.emit(UiEvent::ProgressChanged(Some(progress)));
    }

    pub fn clear_progress(&mut self) {
        if self.progress.take().is_some() {
            self.emit(UiEvent::ProgressChanged(None));
        }
    }

    // ========== Snapshots ==========

    /// Reconcile a pushed snapshot against what is on screen.
    pub fn on_projects_updated(&mut self, update: ProjectsUpdate) -> Decision {
        let ProjectsUpdate {
            projects,
            changed_file,
        } = update;

        if let Some(changed_file) = changed_file.as_deref() {
            self.note_changed_file(changed_file);
        }

        let decision = accept_snapshot(&self.projects, &projects, &self.selection, &self.registry);
        match decision {
            Decision::Accept(reason) => {
                debug!("Accepting project snapshot ({:?})", reason);
                self.replace_projects(projects);
            }
            Decision::Reject(reason) => {
                debug!("Discarding project snapshot: {}", reason);
            }
        }
        decision
    }

    /// Replace the project list unconditionally. Used for accepted pushes
    /// and pull-based refreshes.
    pub fn replace_projects(&mut self, projects: Vec<ProjectSnapshot>) {
        self.projects = Arc::new(projects);
        self.emit(UiEvent::ProjectsReplaced(Arc::clone(&self.projects)));
        self.revalidate_selection();
    }

    /// Drop the selected session if the refreshed project no longer lists it.
    ///
    /// A missing project leaves the selection alone, and so does a
    /// placeholder session, which snapshots never list.
    fn revalidate_selection(&mut self) {
        let Some(project) = self.selection.resolve_project(&self.projects) else {
            return;
        };
        let Some(session) = self.selection.session.as_ref() else {
            return;
        };
        if session.is_temporary() || project.find_session(session).is_some() {
            return;
        }

        info!(
            "Selected session {} no longer exists in project {}",
            session, project.name
        );
        self.selection.session = None;
        self.emit(UiEvent::SelectionChanged(self.selection.clone()));
    }

    fn note_changed_file(&mut self, changed_file: &str) {
        let Some((_, selected)) = self.selection.pair() else {
            return;
        };
        let Some(selected_id) = selected.as_real() else {
            return;
        };
        if changed_session_id(changed_file) != Some(selected_id) {
            return;
        }
        if self.registry.is_active(selected) {
            debug!(
                "Ignoring external change to active session {}",
                selected_id
            );
            return;
        }

        self.external_changes += 1;
        let event = UiEvent::ExternalChange {
            session_id: selected_id.to_string(),
            generation: self.external_changes,
        };
        self.emit(event);
    }
}
