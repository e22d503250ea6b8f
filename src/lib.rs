//! Client for CMake's server mode.
//!
//! Spawns `cmake -E server`, connects over a local channel (domain socket
//! or named pipe), performs the protocol handshake, and drives the server
//! through configure/generate/build while keeping a name-stable model of
//! the reported project/target/cache graph.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cmake_bridge::{CMakeClient, ClientConfig, MemoryContextStore};
//!
//! # async fn run() -> Result<(), cmake_bridge::ClientError> {
//! let config = ClientConfig::new("/path/to/source")?;
//! let (mut client, mut events) = CMakeClient::new(config, Arc::new(MemoryContextStore::new()));
//!
//! client.start().await?;
//! client.generate().await?;
//! client.update_model().await?;
//! client.build(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod matchers;
pub mod protocol;

pub(crate) mod connection;
pub(crate) mod fsutil;
pub(crate) mod process;
pub(crate) mod transport;

mod client;
mod error;
mod model;
mod state;
mod types;

pub use client::CMakeClient;
pub use error::{ClientError, Result};
pub use fsutil::remove_dir_recursive;
pub use model::{
    ContextStore, JsonFileStore, MemoryContextStore, ProjectModel, SelectionContext,
};
pub use state::ClientState;
pub use types::{
    BuildDiagnostic, BuildOutcome, ClientConfig, ClientEvent, ConfigError, DiagnosticSeverity,
};
