//! Rosetta Server - live collaboration on a shared mapping tree
//!
//! This crate implements the server side of the Rosetta protocol, letting
//! many clients watch and edit one authoritative mapping tree at once.
//!
//! The server supports:
//! - Password, protocol-version and checksum checked logins
//! - Observer, editor and admin permission levels
//! - Per-entry optimistic concurrency with conflict replies
//! - Ordered change broadcast with catch-up after reconnects
//! - Heartbeat timeouts and backpressure disconnects

pub mod address;
pub mod codec;
mod config;
mod error;
mod handlers;
mod hub;
pub mod protocol;
mod server;
pub mod session;

pub use address::{parse_address, ServerAddress, DEFAULT_PORT};
pub use codec::ProtocolError;
pub use config::{RemovalPolicy, ServerSettings};
pub use error::{Result, ServerError};
pub use hub::{Hub, HubCommand, HubHandle, SharedTree, TreeEvent};
pub use protocol::{ClientMessage, PermissionLevel, ServerMessage, SessionId};
pub use server::RosettaServer;
