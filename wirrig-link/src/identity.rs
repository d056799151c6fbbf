use std::fmt;

use crate::{ConfigError, HardwareAddress, MQTT_MAX_CLIENT_LEN};

/// Length of a MAC rendered as lower-case hex
pub(crate) const MAC_HEX_LEN: usize = 12;

/// Lower-case hex rendering of a hardware address, no separators
pub(crate) fn mac_hex(mac: &HardwareAddress) -> Result<heapless::String<MAC_HEX_LEN>, ConfigError> {
    let mut buf = [0u8; MAC_HEX_LEN];
    hex::encode_to_slice(mac, &mut buf)
        .map_err(|_| ConfigError::ResourceExhausted("hardware address"))?;
    let hex = std::str::from_utf8(&buf)
        .map_err(|_| ConfigError::ResourceExhausted("hardware address"))?;
    heapless::String::try_from(hex).map_err(|_| ConfigError::ResourceExhausted("hardware address"))
}

/// Identifier presented when opening the messaging session: a fixed
/// prefix followed by the device MAC in lower-case hex. Derived once,
/// never mutated, so it is safe to clone and share freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(heapless::String<MQTT_MAX_CLIENT_LEN>);

impl ClientIdentity {
    pub fn from_hardware(prefix: &str, mac: &HardwareAddress) -> Result<Self, ConfigError> {
        let len = prefix.len() + MAC_HEX_LEN;
        if len > MQTT_MAX_CLIENT_LEN {
            return Err(ConfigError::IdentityTooLong {
                len,
                max: MQTT_MAX_CLIENT_LEN,
            });
        }

        let hex = mac_hex(mac)?;
        let mut id = heapless::String::new();
        id.push_str(prefix)
            .map_err(|_| ConfigError::ResourceExhausted("client identity"))?;
        id.push_str(&hex)
            .map_err(|_| ConfigError::ResourceExhausted("client identity"))?;
        Ok(Self(id))
    }

    /// Use a fixed identity, e.g. one supplied by configuration
    pub fn new(id: &str) -> Result<Self, ConfigError> {
        heapless::String::try_from(id)
            .map(Self)
            .map_err(|_| ConfigError::IdentityTooLong {
                len: id.len(),
                max: MQTT_MAX_CLIENT_LEN,
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: HardwareAddress = [0x24, 0x0a, 0xc4, 0xAB, 0x00, 0xff];

    #[test]
    fn prefix_plus_lower_hex_mac() {
        let id = ClientIdentity::from_hardware("whan_", &MAC).unwrap();
        assert_eq!(id.as_str(), "whan_240ac4ab00ff");
        assert_eq!(id.to_string(), "whan_240ac4ab00ff");
    }

    #[test]
    fn identity_is_deterministic() {
        let a = ClientIdentity::from_hardware("irrig-", &MAC).unwrap();
        let b = ClientIdentity::from_hardware("irrig-", &MAC).unwrap();
        assert_eq!(a.as_str().as_bytes(), b.as_str().as_bytes());

        let other = ClientIdentity::from_hardware("irrig-", &[0, 0, 0, 0, 0, 1]).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn oversized_prefix_is_config_error() {
        let res = ClientIdentity::from_hardware("a-very-long-prefix", &MAC);
        assert_eq!(
            res,
            Err(ConfigError::IdentityTooLong {
                len: 30,
                max: MQTT_MAX_CLIENT_LEN
            })
        );
    }

    #[test]
    fn prefix_at_limit_fits() {
        let id = ClientIdentity::from_hardware("12345678901", &MAC).unwrap();
        assert_eq!(id.as_str().len(), MQTT_MAX_CLIENT_LEN);
    }

    #[test]
    fn fixed_identity_is_bounded() {
        assert!(ClientIdentity::new("controller-1").is_ok());
        assert!(matches!(
            ClientIdentity::new("this-identity-is-far-too-long"),
            Err(ConfigError::IdentityTooLong { .. })
        ));
    }
}
