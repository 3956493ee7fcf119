//! Remote host service.
//!
//! This module provides:
//! - Protocol types for client-host communication
//! - Request handling against credentials, sessions and the command executor
//! - The TCP server that owns client connections
//! - A blocking client for the same protocol
//!
//! The wire format is JSON-over-TCP with newline-delimited messages.

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

pub use client::{HostClient, HostClientError, RemoteOutput, RemoteSystemInfo};
pub use handler::{handle_frame, handle_request, Handled, HostState};
pub use protocol::*;
pub use server::{Connection, ConnectionInfo, HostServer, ServerHandle, ServerInfo, MAX_FRAME_BYTES};
