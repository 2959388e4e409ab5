#![allow(clippy::result_large_err)]

//! SSH local port forwarding for migration databases.
//!
//! A [`TunnelManager`] keeps at most one live forwarder per tunnel machine
//! name. Each forwarder multiplexes all of its connections on a single
//! thread: libssh2 sessions are not safely shareable across threads, so the
//! session and every channel stay on the thread that created them.

mod forwarder;
mod manager;
mod session;

pub use forwarder::{ActiveTunnel, spawn_forwarder};
pub use manager::{TunnelManager, TunnelSpawner};
pub use session::{HostKeyPolicy, establish_session};

use thiserror::Error;

/// SSH tunnel lifecycle errors.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// TCP dial or SSH handshake against the server endpoint failed.
    #[error("ssh connection failed: {0}")]
    Connect(String),

    /// The server's host key failed known-hosts verification.
    #[error("host key verification failed: {0}")]
    HostKey(String),

    /// Agent authentication for the configured user failed.
    #[error("ssh authentication failed: {0}")]
    Auth(String),

    /// Could not bind the local listener endpoint.
    #[error("failed to bind local endpoint: {0}")]
    Bind(String),

    /// The forwarded remote endpoint is unreachable through the server.
    #[error("remote endpoint unreachable: {0}")]
    Remote(String),
}
