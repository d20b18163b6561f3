//! Inbound message classification.
//!
//! Every raw frame is decoded by its `type` tag into a [`Routed`] event for the
//! coordinator. Bad frames are dropped here with a diagnostic and never reach
//! the coordinator or close the channel.
//!
//! The router also owns the progress clear timer: a `complete` progress event
//! arms it, any later progress event disarms it, and an armed timer that
//! reaches its deadline clears the indicator exactly once.

use std::time::Duration;

use canopy_protocol::{LoadingPhase, LoadingProgress, ProjectsUpdate, ServerMessage, SessionId};
use log::{debug, warn};
use tokio::time::Instant;

/// How long a completed progress indicator stays visible.
pub const DEFAULT_PROGRESS_CLEAR_DELAY: Duration = Duration::from_millis(500);

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Show this progress.
    Progress(LoadingProgress),
    /// Full snapshot to reconcile.
    ProjectsUpdated(ProjectsUpdate),
    /// The backend assigned the real id for the conversation in flight.
    SessionCreated { real_id: String },
    /// The response for a session finished or was aborted.
    ResponseSettled { session_id: SessionId, aborted: bool },
    /// Whether the assistant is still computing for a session.
    ProcessingStatus {
        session_id: SessionId,
        processing: bool,
    },
}

/// Progress clear timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearTimer {
    #[default]
    Idle,
    Armed {
        deadline: Instant,
    },
}

#[derive(Debug)]
pub struct MessageRouter {
    clear_delay: Duration,
    clear_timer: ClearTimer,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CLEAR_DELAY)
    }
}

impl MessageRouter {
    pub fn new(clear_delay: Duration) -> Self {
        Self {
            clear_delay,
            clear_timer: ClearTimer::Idle,
        }
    }

    /// Decode one frame. Returns `None` for anything the coordinator should not see.
    pub fn route(&mut self, raw: &str, now: Instant) -> Option<Routed> {
        let message = match serde_json::from_str::<ServerMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                let preview: String = raw.chars().take(200).collect();
                warn!("Dropping malformed push message ({}): {}", e, preview);
                return None;
            }
        };

        match message {
            ServerMessage::LoadingProgress(progress) => {
                self.on_progress(progress.phase, now);
                Some(Routed::Progress(progress))
            }
            ServerMessage::ProjectsUpdated(update) => Some(Routed::ProjectsUpdated(update)),
            ServerMessage::SessionCreated { session_id } => Some(Routed::SessionCreated {
                real_id: session_id,
            }),
            ServerMessage::ResponseComplete { session_id } => Some(Routed::ResponseSettled {
                session_id,
                aborted: false,
            }),
            ServerMessage::SessionAborted { session_id } => Some(Routed::ResponseSettled {
                session_id,
                aborted: true,
            }),
            ServerMessage::SessionStatus {
                session_id,
                is_processing,
            } => Some(Routed::ProcessingStatus {
                session_id,
                processing: is_processing,
            }),
            ServerMessage::Unknown => {
                debug!("Ignoring push message of unknown type");
                None
            }
        }
    }

    fn on_progress(&mut self, phase: LoadingPhase, now: Instant) {
        self.clear_timer = match phase {
            LoadingPhase::Complete => ClearTimer::Armed {
                deadline: now + self.clear_delay,
            },
            _ => ClearTimer::Idle,
        };
    }

    pub fn clear_timer(&self) -> ClearTimer {
        self.clear_timer
    }

    /// When the armed clear timer fires, if armed.
    pub fn clear_deadline(&self) -> Option<Instant> {
        match self.clear_timer {
            ClearTimer::Armed { deadline } => Some(deadline),
            ClearTimer::Idle => None,
        }
    }

    /// Disarm the timer if its deadline has passed. Returns true when the
    /// progress indicator should be cleared.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.clear_timer {
            ClearTimer::Armed { deadline } if now >= deadline => {
                self.clear_timer = ClearTimer::Idle;
                true
            }
            _ => false,
        }
    }

    /// Disarm without firing.
    pub fn cancel_clear(&mut self) {
        self.clear_timer = ClearTimer::Idle;
    }
}
