//! Local channel to the cmake server process.
//!
//! cmake server mode listens on the address passed via `--pipe=`: a named
//! pipe on Windows, a filesystem socket elsewhere. Addresses are derived
//! from {instance name, pid} so concurrent clients never collide. The
//! server needs a moment after spawn before it listens, so `connect` runs
//! a bounded retry loop instead of a single attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Interval between connect attempts while the server warms up.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default overall connect deadline.
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(unix)]
pub(crate) use tokio::net::UnixStream as Stream;

#[cfg(windows)]
pub(crate) use tokio::net::windows::named_pipe::NamedPipeClient as Stream;

/// Channel address for one client instance.
#[cfg(unix)]
pub(crate) fn channel_address(instance: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{instance}-{}-cmake.sock", std::process::id()))
}

#[cfg(windows)]
pub(crate) fn channel_address(instance: &str) -> PathBuf {
    PathBuf::from(format!(
        r"\\.\pipe\{instance}-{}-cmake",
        std::process::id()
    ))
}

#[cfg(unix)]
async fn try_connect(address: &Path) -> std::io::Result<Stream> {
    Stream::connect(address).await
}

#[cfg(windows)]
async fn try_connect(address: &Path) -> std::io::Result<Stream> {
    use tokio::net::windows::named_pipe::ClientOptions;
    ClientOptions::new().open(address)
}

fn is_not_listening_yet(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    ) || err.raw_os_error() == Some(231) // ERROR_PIPE_BUSY
}

/// Connect to the server channel, retrying while the server warms up.
///
/// Retries not-found/refused until `timeout` elapses, then fails hard; any
/// other error fails immediately. No infinite retry: a server that never
/// comes up rejects `start()`.
pub(crate) async fn connect(address: &Path, timeout: Duration) -> Result<Stream> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match try_connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(err) if is_not_listening_yet(&err) && tokio::time::Instant::now() < deadline => {
                tracing::trace!(
                    address = %address.display(),
                    "cmake server not listening yet, retrying"
                );
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(err) => {
                return Err(ClientError::Connect {
                    address: address.display().to_string(),
                    source: err,
                });
            }
        }
    }
}

/// Best-effort removal of the channel resource after stop.
///
/// Named pipes vanish with their server; only filesystem sockets leave a
/// file behind. Failure is advisory.
pub(crate) fn remove_channel(address: &Path) {
    #[cfg(unix)]
    if let Err(err) = std::fs::remove_file(address) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(
                address = %address.display(),
                error = %err,
                "failed to remove channel socket"
            );
        }
    }
    #[cfg(windows)]
    let _ = address;
}
