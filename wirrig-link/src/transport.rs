use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use tokio::{runtime::Handle, sync::mpsc::UnboundedSender, task::JoinHandle};

use crate::{InboundMessage, SessionError, SessionParams, SessionTransport};

const REQUEST_CAPACITY: usize = 20;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long a closing event loop gets to flush the DISCONNECT
const CLOSE_GRACE: Duration = Duration::from_millis(500);
const ONLINE: &[u8] = b"online";
const OFFLINE: &[u8] = b"offline";

/// [`SessionTransport`] over `rumqttc`. Each open spawns a task polling
/// the client event loop.
///
/// Closing marks that task's connection dead at once, so nothing from
/// it reaches the inbound channel and it never reconnects, then gives
/// the loop [`CLOSE_GRACE`] to send a clean DISCONNECT (which keeps the
/// broker from firing the `offline` last will) before aborting it.
pub struct RumqttTransport {
    inbound: UnboundedSender<InboundMessage>,
    topics: Arc<Mutex<Vec<String>>>,
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
    live: Arc<AtomicBool>,
}

impl RumqttTransport {
    pub fn new(inbound: UnboundedSender<InboundMessage>) -> Self {
        Self {
            inbound,
            topics: Arc::new(Mutex::new(Vec::new())),
            client: None,
            task: None,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    fn client(&self) -> Result<&AsyncClient, SessionError> {
        self.client.as_ref().ok_or(SessionError::Closed)
    }
}

impl SessionTransport for RumqttTransport {
    fn open(
        &mut self,
        params: &SessionParams,
        subscriptions: &[String],
    ) -> Result<(), SessionError> {
        let mut options = MqttOptions::new(
            params.client_identity.as_str(),
            params.host.clone(),
            params.port,
        );
        options.set_keep_alive(params.keep_alive);
        if let Some(creds) = &params.credentials {
            options.set_credentials(creds.username.clone(), creds.password.clone());
        }
        if params.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(status) = &params.status_topic {
            options.set_last_will(LastWill::new(
                status.clone(),
                OFFLINE.to_vec(),
                QoS::AtLeastOnce,
                true,
            ));
        }

        if let Ok(mut topics) = self.topics.lock() {
            *topics = subscriptions.to_vec();
        }

        // a fresh flag per connection, the previous one stays dead
        self.live = Arc::new(AtomicBool::new(true));
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            self.topics.clone(),
            params.status_topic.clone(),
            self.inbound.clone(),
            self.live.clone(),
        ));
        self.client = Some(client);
        self.task = Some(task);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.live.store(false, Ordering::Release);
        let disconnecting = match self.client.take() {
            Some(client) => match client.try_disconnect() {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Disconnect request not sent {e:}");
                    false
                }
            },
            None => false,
        };

        if let Some(mut task) = self.task.take() {
            match Handle::try_current() {
                Ok(runtime) if disconnecting => {
                    runtime.spawn(async move {
                        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                            log::debug!("Event loop did not wind down, aborting");
                            task.abort();
                        }
                    });
                }
                _ => task.abort(),
            }
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), SessionError> {
        self.client()?
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|e| SessionError::Client(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if let Ok(mut topics) = self.topics.lock() {
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        self.client()?
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| SessionError::Client(e.to_string()))
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    status: Option<String>,
    inbound: UnboundedSender<InboundMessage>,
    live: Arc<AtomicBool>,
) {
    loop {
        let event = eventloop.poll().await;
        let is_live = live.load(Ordering::Acquire);
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) if is_live => {
                log::info!("Broker connection acknowledged");
                // the broker may have dropped our session, subscribe again
                let topics = match topics.lock() {
                    Ok(topics) => topics.clone(),
                    Err(_) => Vec::new(),
                };
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        log::error!("Re-subscribe to {topic} failed {e:}");
                    }
                }
                if let Some(status) = &status {
                    if let Err(e) =
                        client.try_publish(status.as_str(), QoS::AtLeastOnce, true, ONLINE.to_vec())
                    {
                        log::warn!("Failed to announce online status {e:}");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if is_live => {
                let msg = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if inbound.send(msg).is_err() {
                    log::warn!("Inbound receiver dropped, discarding message");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                log::warn!("Broker sent disconnect");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!("Disconnect sent to broker");
                break;
            }
            Ok(_) => {}
            Err(e) if !is_live => {
                log::debug!("Closed session event loop ended {e:}");
                break;
            }
            Err(e) => {
                log::warn!("Broker connection error {e:}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
