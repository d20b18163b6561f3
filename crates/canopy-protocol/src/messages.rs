//! Push messages (Server -> Client).

use serde::{Deserialize, Serialize};

use crate::snapshot::{ProjectSnapshot, SessionId};

// ============================================================================
// Envelope
// ============================================================================

/// Messages pushed by the backend, tagged by `type`.
///
/// Types this client does not know deserialize to `Unknown` so server-side
/// additions never break the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Progress of the backend's project scan.
    LoadingProgress(LoadingProgress),

    /// Full project list replacement.
    ProjectsUpdated(ProjectsUpdate),

    // -- Session lifecycle --
    /// The backend assigned a real id to the conversation the user just started.
    SessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// The assistant finished responding.
    ResponseComplete {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// The user aborted the in-flight response.
    SessionAborted {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// Answer to `check_session_status`.
    SessionStatus {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "isProcessing", default)]
        is_processing: bool,
    },

    #[serde(other)]
    Unknown,
}

// ============================================================================
// Payloads
// ============================================================================

/// Phase of a project scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingPhase {
    Start,
    Progress,
    Complete,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingProgress {
    pub phase: LoadingPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsUpdate {
    pub projects: Vec<ProjectSnapshot>,
    /// On-disk session file whose change triggered this push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_file: Option<String>,
}
