//! Typed error surface for the client.
//!
//! Every async operation rejects with a [`ClientError`]; the crate never
//! logs or displays caller-facing failures itself. The embedder decides
//! what to show.

use std::path::PathBuf;

use crate::protocol::RequestKind;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::types::ConfigError),

    /// Spawning the cmake server subprocess failed.
    #[error("failed to spawn cmake server: {0}")]
    Spawn(#[source] std::io::Error),

    /// The cmake executable could not be resolved.
    #[error("cmake executable not found: {0}")]
    CmakeNotFound(#[from] which::Error),

    /// Connecting to the server channel failed within the deadline.
    #[error("could not connect to cmake server at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation requires a running, handshaken session.
    #[error("not connected to cmake server")]
    NotConnected,

    /// Configure/generate/model operations are illegal while a build runs.
    #[error("build in progress")]
    BuildInProgress,

    /// Model operations require a generated build system.
    #[error("build system not generated yet")]
    NotGenerated,

    /// A request of this kind is already awaiting its reply.
    ///
    /// The wire protocol correlates replies by request type, not by id, so
    /// at most one request per kind may be outstanding.
    #[error("a {0} request is already pending")]
    RequestPending(RequestKind),

    /// The server answered a request with an error payload.
    #[error("cmake server error: {message}")]
    Server { message: String },

    /// The channel closed while a request was in flight.
    #[error("connection to cmake server closed")]
    ChannelClosed,

    /// A wire frame could not be produced or understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel or build-process I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Recursive removal exceeded the depth cap.
    #[error("directory tree too deep while removing {0}")]
    RemovalTooDeep(PathBuf),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
