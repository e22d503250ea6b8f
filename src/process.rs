//! Supervisor for the cmake server subprocess.
//!
//! The server is launched with `-E server --pipe=<address> --experimental`
//! and owns the listening end of the channel; all protocol traffic flows
//! over that channel, not stdio. Child termination is observed upstream
//! through the channel closing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{ClientError, Result};
use crate::transport;
use crate::types::ClientConfig;

pub(crate) struct ServerProcess {
    child: Child,
    address: PathBuf,
}

impl ServerProcess {
    /// Spawn the server subprocess listening on `address`.
    ///
    /// The child environment is the process environment with the config's
    /// `configure_env` overrides applied on top. Spawn failure rejects the
    /// caller's `start()`; there is no retry.
    pub fn spawn(config: &ClientConfig, address: &Path) -> Result<Self> {
        let resolved = which::which(config.cmake_command())?;

        let pipe_arg = format!("--pipe={}", address.display());
        let mut cmd = Command::new(&resolved);
        cmd.args(["-E", "server", pipe_arg.as_str(), "--experimental"])
            .envs(config.configure_env())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(
            cmake = %resolved.display(),
            address = %address.display(),
            "spawning cmake server"
        );
        let child = cmd.spawn().map_err(ClientError::Spawn)?;

        Ok(Self {
            child,
            address: address.to_path_buf(),
        })
    }

    /// Kill the subprocess, wait for it to exit, then clean up the channel
    /// resource best-effort. The wait is unbounded; the kill is not
    /// maskable, so exit follows promptly.
    pub async fn stop(mut self) {
        if let Err(err) = self.child.kill().await {
            tracing::debug!(error = %err, "cmake server already exited");
        }
        transport::remove_channel(&self.address);
        tracing::debug!("cmake server stopped");
    }
}
