//! Snapshot reconciliation.
//!
//! Decides whether an incoming snapshot may replace the one on screen. The
//! decision covers the whole snapshot: on accept everything is replaced, on
//! reject everything is discarded. There is no field-level merge.

use std::fmt;

use canopy_protocol::{ProjectSnapshot, Session};

use crate::protection::ProtectionRegistry;
use crate::selection::{Selection, find_project};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept(AcceptReason),
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    /// No project or no session selected.
    NoSelection,
    /// The selection is not protected.
    Unprotected,
    /// Protected, but the selected session is unchanged.
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The selected project is missing from one side.
    ProjectMissing,
    /// The selected session is missing from one side.
    SessionMissing,
    /// The selected session's identifying fields changed.
    SessionChanged,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectMissing => write!(f, "selected project missing"),
            Self::SessionMissing => write!(f, "selected session missing"),
            Self::SessionChanged => write!(f, "selected session changed"),
        }
    }
}

/// The fields that identify a session's displayed state.
#[derive(Debug, PartialEq, Eq)]
struct Fingerprint<'a> {
    id: &'a str,
    summary: Option<&'a str>,
    created_at: Option<&'a str>,
    updated_at: Option<&'a str>,
}

impl<'a> From<&'a Session> for Fingerprint<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            id: &session.id,
            summary: session.summary.as_deref(),
            created_at: session.created_at.as_deref(),
            updated_at: session.updated_at.as_deref(),
        }
    }
}

/// Decide whether `after` may replace `before`.
pub fn accept_snapshot(
    before: &[ProjectSnapshot],
    after: &[ProjectSnapshot],
    selection: &Selection,
    registry: &ProtectionRegistry,
) -> Decision {
    let Some((project, session)) = selection.pair() else {
        return Decision::Accept(AcceptReason::NoSelection);
    };

    if !registry.is_protected(Some(session)) {
        return Decision::Accept(AcceptReason::Unprotected);
    }

    let (Some(old_project), Some(new_project)) =
        (find_project(before, project), find_project(after, project))
    else {
        return Decision::Reject(RejectReason::ProjectMissing);
    };

    let (Some(old_session), Some(new_session)) = (
        old_project.find_session(session),
        new_project.find_session(session),
    ) else {
        return Decision::Reject(RejectReason::SessionMissing);
    };

    if Fingerprint::from(old_session) == Fingerprint::from(new_session) {
        Decision::Accept(AcceptReason::Additive)
    } else {
        Decision::Reject(RejectReason::SessionChanged)
    }
}

/// Session id named by a changed session file: the last path segment with
/// its extension stripped. Both `/` and `\` separate segments.
pub fn changed_session_id(changed_file: &str) -> Option<&str> {
    let file_name = changed_file.rsplit(['/', '\\']).next()?;
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    (!stem.is_empty()).then_some(stem)
}
