//! The `wirrig-link` crate owns everything on the irrigation controller
//! that depends on the wireless link being up.
//!
//! The crate defines a [`ConnectivitySupervisor`], a task that drains a
//! bounded queue of [`NetEvent`]s posted by the station driver and is the
//! only writer of the [`ConnectionState`]. Its responsibilities:
//! 1. Track association state per the transition table in
//!    [`LinkStateMachine`], publishing the result as lock-free
//!    [`LinkStatus`] snapshots (the `connected` / `disconnected` sticky
//!    flags) for any other task to poll or await.
//! 2. Start the [`MessagingSession`] and time sync service when an
//!    address is acquired, and stop both when the station drops.
//! 3. Force re-association after a disconnect, since the station does
//!    not do so on its own, backing off on consecutive failures.
//!
//! Driver callbacks hand events over with [`NetEventSender::notify`],
//! which never blocks.
//!
//! # Examples
//! ```rust,ignore
//! let (events, queue) = wirrig_link::net_event_channel(16);
//! let station = MyStation::new(events.clone());
//! let (status, _task) = ConnectivitySupervisor::new(
//!     queue,
//!     Box::new(station),
//!     Box::new(session.clone()),
//!     Box::new(time_sync),
//!     RetryPolicy::default(),
//! )
//! .spawn();
//!
//! events.notify(NetEvent::StationStarted)?;
//! status.wait_connected().await;
//! ```

mod identity;
mod service;
mod session;
mod state;
mod supervisor;
mod timesync;
mod topics;
mod transport;

pub use identity::ClientIdentity;
pub use service::{LinkService, StationDriver};
pub use session::{
    Credentials, InboundMessage, MessagingSession, SessionError, SessionParams, SessionState,
    SessionTransport, SharedSession,
};
pub use state::{ConnectionState, LinkStatus};
pub use supervisor::{
    net_event_channel, ConnectivitySupervisor, LinkAction, LinkStateMachine, NetEvent,
    NetEventReceiver, NetEventSender, RetryPolicy,
};
pub use timesync::{ClockOffset, SntpTimeSync, TimeSyncError};
pub use topics::{InboundTopic, TopicSet};
pub use transport::RumqttTransport;

use thiserror::Error;

/// Hardware (MAC) address of the station interface, read once at startup
pub type HardwareAddress = [u8; 6];

/// MQTT 3.1 caps the client identifier at 23 bytes
pub const MQTT_MAX_CLIENT_LEN: usize = 23;

/// Bound on generated topic names
pub const MAX_TOPIC_LEN: usize = 64;

/// Setup-time configuration problems. These are surfaced once and the
/// affected subsystem is not started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Client identity of {len} bytes exceeds maximum of {max}")]
    IdentityTooLong { len: usize, max: usize },
    #[error("Broker host is empty")]
    EmptyHost,
    #[error("Broker port must be non-zero")]
    InvalidPort,
    #[error("Out of buffer space building {0}")]
    ResourceExhausted(&'static str),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Session Error")]
    Session(#[from] SessionError),
    #[error("Network event queue full")]
    QueueFull,
    #[error("Supervisor has exited")]
    SupervisorGone,
}
