//! Canopy wire types.
//!
//! This crate defines the shapes that travel over the live update channel:
//! - **Inbound** push messages from the backend (`ServerMessage`)
//! - **Outbound** client commands (`ClientCommand`)
//! - Project/session snapshots carried inside `projects_updated` and
//!   returned by the project list endpoint
//!
//! It has no I/O and no runtime dependencies beyond serde.

pub mod commands;
pub mod messages;
pub mod snapshot;

pub use commands::ClientCommand;
pub use messages::{LoadingPhase, LoadingProgress, ProjectsUpdate, ServerMessage};
pub use snapshot::{ProjectSnapshot, Session, SessionId};
