//! Push channel: one duplex connection, kept alive by a supervisor.
//!
//! - `connection` owns a single open link and pumps frames through it
//! - `supervisor` keeps exactly one live connection, reconnecting at a fixed
//!   cadence until shut down
//! - `memory` is an in-process transport for tests and demos

pub mod connection;
pub mod memory;
pub mod supervisor;
pub mod types;

pub use connection::{ChannelConnection, Connector, WsConnector};
pub use supervisor::ChannelSupervisor;
pub use types::{ChannelEvent, ConnectionState};
