use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use wirrig_link::{InboundMessage, InboundTopic, TopicSet};

/// Work handed to the irrigation controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Set a controller channel (zone, pump, schedule...) to `payload`
    Channel { channel: String, payload: String },
    /// Fetch and apply the firmware image at `url`
    OtaUpgrade { url: String },
}

/// Map an inbound broker message onto a controller command
pub fn route(topics: &TopicSet, msg: &InboundMessage) -> Option<ControllerCommand> {
    let payload = match std::str::from_utf8(&msg.payload) {
        Ok(payload) => payload.trim(),
        Err(_) => {
            log::warn!("Non UTF-8 payload on {}, dropping", msg.topic);
            return None;
        }
    };

    match topics.classify(&msg.topic) {
        Some(InboundTopic::Command { channel }) => Some(ControllerCommand::Channel {
            channel: channel.to_string(),
            payload: payload.to_string(),
        }),
        Some(InboundTopic::OtaRequest) if payload.is_empty() => {
            log::warn!("OTA request without an image URL");
            None
        }
        Some(InboundTopic::OtaRequest) => Some(ControllerCommand::OtaUpgrade {
            url: payload.to_string(),
        }),
        None => {
            log::warn!("Unhandled topic {}", msg.topic);
            None
        }
    }
}

pub async fn run(
    mut inbound: UnboundedReceiver<InboundMessage>,
    topics: TopicSet,
    controller: UnboundedSender<ControllerCommand>,
) {
    while let Some(msg) = inbound.recv().await {
        let Some(cmd) = route(&topics, &msg) else {
            continue;
        };
        log::info!("Routing {cmd:?}");
        if controller.send(cmd).is_err() {
            log::error!("Controller channel closed, command task exiting");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn topics() -> TopicSet {
        TopicSet::new("irrig", &[0x24, 0x0a, 0xc4, 0xab, 0x00, 0xff]).unwrap()
    }

    fn msg(topic: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn channel_commands() {
        assert_eq!(
            route(&topics(), &msg("irrig/240ac4ab00ff/zone1/set", b" on\n")),
            Some(ControllerCommand::Channel {
                channel: "zone1".into(),
                payload: "on".into()
            })
        );
    }

    #[test]
    fn ota_requests() {
        let url = b"https://updates.example.net/irrig-1.2.bin";
        assert_eq!(
            route(&topics(), &msg("whan/ota_upgrade/240ac4ab00ff/req", url)),
            Some(ControllerCommand::OtaUpgrade {
                url: "https://updates.example.net/irrig-1.2.bin".into()
            })
        );
        assert_eq!(
            route(&topics(), &msg("whan/ota_upgrade/240ac4ab00ff/req", b"")),
            None
        );
    }

    #[test]
    fn unknown_or_garbled_messages_are_dropped() {
        assert_eq!(route(&topics(), &msg("irrig/other/zone1/set", b"on")), None);
        assert_eq!(
            route(&topics(), &msg("irrig/240ac4ab00ff/zone1/set", &[0xff, 0xfe])),
            None
        );
    }

    #[tokio::test]
    async fn commands_reach_controller_in_order() {
        let (in_tx, in_rx) = unbounded_channel();
        let (ctl_tx, mut ctl_rx) = unbounded_channel();
        let task = tokio::spawn(run(in_rx, topics(), ctl_tx));

        in_tx.send(msg("irrig/240ac4ab00ff/pump/set", b"off")).unwrap();
        in_tx.send(msg("noise", b"")).unwrap();
        in_tx.send(msg("irrig/240ac4ab00ff/zone3/set", b"15")).unwrap();
        drop(in_tx);
        task.await.unwrap();

        let first = ctl_rx.recv().await.unwrap();
        let second = ctl_rx.recv().await.unwrap();
        assert!(matches!(first, ControllerCommand::Channel { ref channel, .. } if channel == "pump"));
        assert!(matches!(second, ControllerCommand::Channel { ref channel, .. } if channel == "zone3"));
        assert!(ctl_rx.recv().await.is_none());
    }
}
