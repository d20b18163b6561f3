//! Session protection registry.
//!
//! Tracks which sessions must not be overwritten by an incoming snapshot
//! (`active`) and, independently, which sessions the assistant is still
//! computing for (`processing`). The processing set only drives UI banners
//! and plays no part in protection.
//!
//! The sets are private. All mutation goes through the mark/unmark
//! operations below, and the coordinator is the only caller.

use std::collections::HashSet;

use canopy_protocol::SessionId;
use log::debug;

#[derive(Debug, Clone, Default)]
pub struct ProtectionRegistry {
    active: HashSet<SessionId>,
    processing: HashSet<SessionId>,
}

impl ProtectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_active(&mut self, id: SessionId) {
        if self.active.insert(id.clone()) {
            debug!("Session {} marked active", id);
        }
    }

    pub fn mark_inactive(&mut self, id: &SessionId) {
        if self.active.remove(id) {
            debug!("Session {} marked inactive", id);
        }
    }

    pub fn mark_processing(&mut self, id: SessionId) {
        self.processing.insert(id);
    }

    pub fn mark_not_processing(&mut self, id: &SessionId) {
        self.processing.remove(id);
    }

    /// Swap every placeholder in `active` for the real id.
    ///
    /// Real ids already present are kept. The swap happens within one call,
    /// so there is no point at which the conversation is unprotected.
    pub fn replace_temporary(&mut self, real_id: impl Into<String>) {
        let real = SessionId::Real(real_id.into());
        let before = self.active.len();
        self.active.retain(|id| !id.is_temporary());
        let replaced = before - self.active.len();
        self.active.insert(real.clone());
        debug!(
            "Bridged {} placeholder session(s) to real id {}",
            replaced, real
        );
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.active.contains(id)
    }

    pub fn is_processing(&self, id: &SessionId) -> bool {
        self.processing.contains(id)
    }

    /// Whether a conversation that has not been assigned a real id is in flight.
    pub fn has_temporary(&self) -> bool {
        self.active.iter().any(SessionId::is_temporary)
    }

    /// Whether snapshots must be checked before touching `selected`.
    ///
    /// True when the selected session is active, or when any placeholder is
    /// active: until the real id arrives there is no telling which displayed
    /// session the new conversation is.
    pub fn is_protected(&self, selected: Option<&SessionId>) -> bool {
        selected.is_some_and(|id| self.active.contains(id)) || self.has_temporary()
    }

    pub fn active(&self) -> impl Iterator<Item = &SessionId> {
        self.active.iter()
    }

    pub fn processing(&self) -> impl Iterator<Item = &SessionId> {
        self.processing.iter()
    }
}
