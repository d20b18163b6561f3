//! Canopy live update coordinator.
//!
//! Keeps a client's project/session view in sync with a backend push channel
//! without letting background snapshots clobber a conversation in progress.

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protection;
pub mod reconcile;
pub mod router;
pub mod selection;
pub mod source;

pub use channel::{ChannelSupervisor, ConnectionState, Connector, WsConnector};
pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorRuntime, CoordinatorView,
    UiEvent,
};
pub use error::{ChannelError, SourceError};
pub use protection::ProtectionRegistry;
pub use reconcile::{Decision, accept_snapshot};
pub use router::{MessageRouter, Routed};
pub use selection::Selection;
pub use source::{HttpProjectSource, ProjectSource};
