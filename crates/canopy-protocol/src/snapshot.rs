//! Project and session snapshots.
//!
//! A snapshot is a complete, point-in-time listing owned by the backend. The
//! client only ever holds read-only copies and replaces them wholesale.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Wire prefix for client-minted placeholder ids.
const TEMPORARY_PREFIX: &str = "new-session-";

/// Identity of a conversation.
///
/// A conversation started by the user gets a `Temporary` id the moment the
/// first message is sent. The backend later assigns the `Real` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionId {
    /// Client-minted placeholder, not yet acknowledged by the backend.
    Temporary(String),
    /// Server-assigned id.
    Real(String),
}

impl SessionId {
    /// Mint a fresh placeholder id.
    pub fn temporary() -> Self {
        Self::Temporary(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn real(id: impl Into<String>) -> Self {
        Self::Real(id.into())
    }

    /// Classify a wire string.
    pub fn from_wire(raw: &str) -> Self {
        match raw.strip_prefix(TEMPORARY_PREFIX) {
            Some(nonce) => Self::Temporary(nonce.to_string()),
            None => Self::Real(raw.to_string()),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The server-assigned id, if this is one.
    pub fn as_real(&self) -> Option<&str> {
        match self {
            Self::Real(id) => Some(id),
            Self::Temporary(_) => None,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(nonce) => write!(f, "{TEMPORARY_PREFIX}{nonce}"),
            Self::Real(id) => f.write_str(id),
        }
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// A session as listed inside a project snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    /// Human-readable summary. Some providers call this `title`.
    #[serde(default, alias = "title", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, alias = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    #[serde(
        default,
        rename = "lastActivity",
        alias = "last_activity",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_activity: Option<String>,

    /// Provider-specific fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: None,
            created_at: None,
            updated_at: None,
            last_activity: None,
            extra: Map::new(),
        }
    }

    /// Whether this entry is the conversation identified by `id`.
    pub fn matches(&self, id: &SessionId) -> bool {
        id.as_real() == Some(self.id.as_str())
    }
}

/// A project and its sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub full_path: String,

    #[serde(default)]
    pub sessions: Vec<Session>,

    /// Provider-specific fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            full_path: String::new(),
            name,
            sessions: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn find_session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.matches(id))
    }
}
