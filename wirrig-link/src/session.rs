use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::{ClientIdentity, ConfigError, LinkError, LinkService, MQTT_MAX_CLIENT_LEN};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is not open")]
    Closed,
    #[error("Client error: {0}")]
    Client(String),
    #[error("Config Error")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Everything needed to open the broker connection. Fixed for the
/// lifetime of the session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub credentials: Option<Credentials>,
    pub client_identity: ClientIdentity,
    pub keep_alive: Duration,
    /// Retained `online` on connect, `offline` as the last will
    pub status_topic: Option<String>,
}

impl SessionParams {
    pub fn new(host: impl Into<String>, port: u16, client_identity: ClientIdentity) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls: false,
            credentials: None,
            client_identity,
            keep_alive: Duration::from_secs(30),
            status_topic: None,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn with_status_topic(mut self, topic: &str) -> Self {
        self.status_topic = Some(topic.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.client_identity.as_str().len();
        if len > MQTT_MAX_CLIENT_LEN {
            return Err(ConfigError::IdentityTooLong {
                len,
                max: MQTT_MAX_CLIENT_LEN,
            });
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
}

/// The client library behind a [`MessagingSession`]. `open` is handed
/// the topics subscribed so far; the transport re-issues them every time
/// the broker acknowledges a connection.
pub trait SessionTransport: Send {
    fn open(&mut self, params: &SessionParams, subscriptions: &[String])
        -> Result<(), SessionError>;

    fn close(&mut self) -> Result<(), SessionError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), SessionError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;
}

/// Connection to the broker. Created once at startup and then opened and
/// closed as the link comes and goes; it is never rebuilt.
#[derive(Debug)]
pub struct MessagingSession<T> {
    params: SessionParams,
    transport: T,
    state: SessionState,
    subscriptions: Vec<String>,
}

impl<T: SessionTransport> MessagingSession<T> {
    pub fn configure(params: SessionParams, transport: T) -> Result<Self, ConfigError> {
        params.validate()?;
        log::info!(
            "Messaging session for {} at {}:{} (tls: {})",
            params.client_identity,
            params.host,
            params.port,
            params.use_tls
        );
        Ok(Self {
            params,
            transport,
            state: SessionState::Closed,
            subscriptions: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Open the session if closed, otherwise do nothing
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Open {
            log::debug!("Session already open");
            return Ok(());
        }
        self.transport.open(&self.params, &self.subscriptions)?;
        self.state = SessionState::Open;
        log::info!("Session opened as {}", self.params.client_identity);
        Ok(())
    }

    /// Close the session if open, otherwise do nothing
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            log::debug!("Session already closed");
            return Ok(());
        }
        self.state = SessionState::Closed;
        log::info!("Session closed");
        self.transport.close()
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::Closed);
        }
        self.transport.publish(topic, payload, retain)
    }

    /// Remember `topic` and subscribe now if the session is open. The
    /// subscription outlives reconnects.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        if self.state == SessionState::Open {
            self.transport.subscribe(topic)?;
        }
        Ok(())
    }
}

/// A [`MessagingSession`] shared between the supervisor, which starts and
/// stops it, and the tasks publishing through it
pub struct SharedSession<T>(Arc<Mutex<MessagingSession<T>>>);

impl<T> Clone for SharedSession<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: SessionTransport> SharedSession<T> {
    pub fn new(session: MessagingSession<T>) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, MessagingSession<T>> {
        self.0.lock().await
    }

    pub async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), SessionError> {
        self.0.lock().await.publish(topic, payload, retain)
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.0.lock().await.subscribe(topic)
    }

    pub async fn is_open(&self) -> bool {
        self.0.lock().await.is_open()
    }
}

#[async_trait]
impl<T: SessionTransport + 'static> LinkService for SharedSession<T> {
    async fn start(&mut self) -> Result<(), LinkError> {
        Ok(self.0.lock().await.start()?)
    }

    async fn stop(&mut self) -> Result<(), LinkError> {
        Ok(self.0.lock().await.stop()?)
    }

    fn name(&self) -> &'static str {
        "messaging session"
    }
}
