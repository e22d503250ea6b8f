//! Client lifecycle states and the shared cell holding the current one.
//!
//! The state is read and written from the operation methods and forced to
//! [`ClientState::Stopped`] by the reader task when the channel drops, so
//! it lives in an atomic cell shared between both.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one client instance, totally ordered.
///
/// Monotonic along `start -> handshake -> configure -> generate`, except
/// that `Configured`/`Generated` are revisited on later configure/generate
/// calls, `Building` always falls back to `Generated`, and any state
/// collapses to `Stopped` on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClientState {
    Stopped = 0,
    Connected = 1,
    Running = 2,
    Configured = 3,
    Generated = 4,
    Building = 5,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Running,
            3 => Self::Configured,
            4 => Self::Generated,
            5 => Self::Building,
            _ => Self::Stopped,
        }
    }
}

/// Shared, atomically updated [`ClientState`].
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell {
    inner: Arc<AtomicU8>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ClientState {
        ClientState::from_u8(self.inner.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ClientState) {
        self.inner.store(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(ClientState::Stopped < ClientState::Connected);
        assert!(ClientState::Connected < ClientState::Running);
        assert!(ClientState::Running < ClientState::Configured);
        assert!(ClientState::Configured < ClientState::Generated);
        assert!(ClientState::Generated < ClientState::Building);
    }

    #[test]
    fn test_cell_roundtrip() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ClientState::Stopped);

        cell.set(ClientState::Generated);
        assert_eq!(cell.get(), ClientState::Generated);

        let alias = cell.clone();
        alias.set(ClientState::Stopped);
        assert_eq!(cell.get(), ClientState::Stopped);
    }
}
