use core::fmt::Write;

use crate::{identity::mac_hex, ConfigError, HardwareAddress, MAX_TOPIC_LEN};

const OTA_PREFIX: &str = "whan/ota_upgrade";

type Topic = heapless::String<MAX_TOPIC_LEN>;

/// What an inbound topic addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    /// `<prefix>/<mac>/<channel>/set`
    Command { channel: &'a str },
    /// Firmware update request, payload is the image URL
    OtaRequest,
}

/// Topic names of this device, all derived from the station MAC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    base: Topic,
    telemetry: Topic,
    commands: Topic,
    ota: Topic,
    status: Topic,
}

fn build(args: core::fmt::Arguments<'_>, what: &'static str) -> Result<Topic, ConfigError> {
    let mut topic = Topic::new();
    topic
        .write_fmt(args)
        .map_err(|_| ConfigError::ResourceExhausted(what))?;
    Ok(topic)
}

impl TopicSet {
    pub fn new(prefix: &str, mac: &HardwareAddress) -> Result<Self, ConfigError> {
        let mac = mac_hex(mac)?;
        let base = build(format_args!("{prefix}/{mac}"), "topic prefix")?;
        Ok(Self {
            telemetry: build(format_args!("{base}/fill"), "telemetry topic")?,
            commands: build(format_args!("{base}/+/set"), "command topic")?,
            ota: build(format_args!("{OTA_PREFIX}/{mac}/req"), "OTA topic")?,
            status: build(format_args!("{base}/status"), "status topic")?,
            base,
        })
    }

    pub fn telemetry(&self) -> &str {
        &self.telemetry
    }

    /// Wildcard subscription covering every command channel
    pub fn commands(&self) -> &str {
        &self.commands
    }

    pub fn ota(&self) -> &str {
        &self.ota
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Topics the device subscribes to
    pub fn subscriptions(&self) -> [&str; 2] {
        [self.commands(), self.ota()]
    }

    pub fn classify<'a>(&self, topic: &'a str) -> Option<InboundTopic<'a>> {
        if topic == self.ota.as_str() {
            return Some(InboundTopic::OtaRequest);
        }
        let channel = topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?
            .strip_suffix("/set")?;
        if channel.is_empty() || channel.contains('/') {
            return None;
        }
        Some(InboundTopic::Command { channel })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: HardwareAddress = [0x24, 0x0a, 0xc4, 0xab, 0x00, 0xff];

    #[test]
    fn topics_use_lower_hex_mac() {
        let topics = TopicSet::new("irrig", &MAC).unwrap();
        assert_eq!(topics.telemetry(), "irrig/240ac4ab00ff/fill");
        assert_eq!(topics.commands(), "irrig/240ac4ab00ff/+/set");
        assert_eq!(topics.ota(), "whan/ota_upgrade/240ac4ab00ff/req");
        assert_eq!(topics.status(), "irrig/240ac4ab00ff/status");
    }

    #[test]
    fn classify_inbound() {
        let topics = TopicSet::new("irrig", &MAC).unwrap();
        assert_eq!(
            topics.classify("irrig/240ac4ab00ff/zone2/set"),
            Some(InboundTopic::Command { channel: "zone2" })
        );
        assert_eq!(
            topics.classify("whan/ota_upgrade/240ac4ab00ff/req"),
            Some(InboundTopic::OtaRequest)
        );
        assert_eq!(topics.classify("irrig/240ac4ab00ff//set"), None);
        assert_eq!(topics.classify("irrig/240ac4ab00ff/a/b/set"), None);
        assert_eq!(topics.classify("irrig/000000000000/zone2/set"), None);
        assert_eq!(topics.classify("irrig/240ac4ab00ff/fill"), None);
    }

    #[test]
    fn oversized_prefix_is_resource_error() {
        let prefix = "p".repeat(MAX_TOPIC_LEN);
        assert!(matches!(
            TopicSet::new(&prefix, &MAC),
            Err(ConfigError::ResourceExhausted(_))
        ));
    }
}
