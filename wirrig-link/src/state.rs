use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};

use tokio::sync::watch;

use crate::LinkError;

/// Association state of the station. Written only by the
/// [`crate::ConnectivitySupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Associating = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Associating,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Default)]
struct LinkFlags {
    connected: AtomicBool,
    disconnected: AtomicBool,
    state: AtomicU8,
}

/// Read-only view of the link. The sticky flags are plain atomics, so
/// polling them never contends with the supervisor; they are eventually
/// consistent with the state machine rather than updated atomically
/// together with it.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    flags: Arc<LinkFlags>,
    watch: watch::Receiver<ConnectionState>,
}

impl LinkStatus {
    /// Set once an address has been acquired, cleared on disconnect
    pub fn is_connected(&self) -> bool {
        self.flags.connected.load(Ordering::Acquire)
    }

    /// Set when the link is lost (or an association attempt fails),
    /// cleared once an address is acquired again
    pub fn has_disconnected(&self) -> bool {
        self.flags.disconnected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.flags.state.load(Ordering::Acquire))
    }

    /// Resolves as soon as the link is up (immediately if it already is)
    pub async fn wait_connected(&self) -> Result<(), LinkError> {
        let mut watch = self.watch.clone();
        watch
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| LinkError::SupervisorGone)
    }
}

/// Writer half, owned by the supervisor task
#[derive(Debug)]
pub(crate) struct LinkStatusWriter {
    flags: Arc<LinkFlags>,
    watch: watch::Sender<ConnectionState>,
}

impl LinkStatusWriter {
    pub(crate) fn new() -> (Self, LinkStatus) {
        let flags = Arc::new(LinkFlags::default());
        let (watch, rx) = watch::channel(ConnectionState::Disconnected);
        (
            Self {
                flags: Arc::clone(&flags),
                watch,
            },
            LinkStatus { flags, watch: rx },
        )
    }

    pub(crate) fn publish(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                self.flags.connected.store(true, Ordering::Release);
                self.flags.disconnected.store(false, Ordering::Release);
            }
            ConnectionState::Disconnected => {
                self.flags.connected.store(false, Ordering::Release);
                self.flags.disconnected.store(true, Ordering::Release);
            }
            ConnectionState::Associating => {}
        }
        self.flags.state.store(state as u8, Ordering::Release);
        self.watch.send_replace(state);
    }
}
