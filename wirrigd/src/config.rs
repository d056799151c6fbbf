use std::{path::PathBuf, str::FromStr, time::Duration};

use wirrig_link::RetryPolicy;
use wirrigp_sensor::MAX_FRAME_CAPACITY;

use crate::{IrrigdError, IrrigdResult};

/// Build-time settings, read from `cfg.toml` in the `[wirrigd]` section
#[toml_cfg::toml_config]
pub struct Config {
    #[default("localhost")]
    mqtt_host: &'static str,
    #[default(1883)]
    mqtt_port: u16,
    #[default(false)]
    mqtt_tls: bool,
    #[default("")]
    mqtt_user: &'static str,
    #[default("")]
    mqtt_pass: &'static str,
    #[default("whan_")]
    client_prefix: &'static str,
    #[default("irrig")]
    topic_prefix: &'static str,
    #[default("wlan0")]
    wifi_iface: &'static str,
    #[default("/dev/ttyUSB0")]
    sensor_device: &'static str,
    #[default("length-prefixed")]
    sensor_framing: &'static str,
    #[default(32)]
    max_frame_len: usize,
    #[default("pool.ntp.org")]
    sntp_server: &'static str,
    #[default(3600)]
    sntp_interval_secs: u64,
    #[default(500)]
    retry_base_ms: u64,
    #[default(30000)]
    retry_max_ms: u64,
    #[default("./logs")]
    log_dir: &'static str,
    #[default("info")]
    log_level: &'static str,
}

/// Wire framing used by the attached sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    LengthPrefixed,
    Delimited,
}

impl FromStr for Framing {
    type Err = IrrigdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "length-prefixed" | "length_prefixed" | "native" => Ok(Framing::LengthPrefixed),
            "delimited" | "hdlc" => Ok(Framing::Delimited),
            _ => Err(IrrigdError::InvalidSetting {
                name: "sensor_framing",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// `None` when no user name is configured
    pub credentials: Option<(String, String)>,
}

/// Validated runtime view of [`Config`]
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub mqtt: MqttSettings,
    pub client_prefix: String,
    pub topic_prefix: String,
    pub wifi_iface: String,
    pub sensor_device: PathBuf,
    pub framing: Framing,
    pub max_frame_len: usize,
    pub sntp_server: String,
    pub sntp_interval: Duration,
    pub retry: RetryPolicy,
    pub log_dir: PathBuf,
    pub log_level: tracing::Level,
}

impl DeviceConfig {
    /// Settings baked in at build time
    pub fn from_build() -> IrrigdResult<Self> {
        Self::try_from(&CONFIG)
    }
}

impl TryFrom<&Config> for DeviceConfig {
    type Error = IrrigdError;

    fn try_from(cfg: &Config) -> IrrigdResult<Self> {
        let max_frame_len = cfg.max_frame_len;
        if !(wirrigp_sensor::FRAME_OVERHEAD..=MAX_FRAME_CAPACITY).contains(&max_frame_len) {
            return Err(IrrigdError::InvalidSetting {
                name: "max_frame_len",
                value: max_frame_len.to_string(),
            });
        }
        if cfg.retry_base_ms == 0 || cfg.retry_max_ms < cfg.retry_base_ms {
            return Err(IrrigdError::InvalidSetting {
                name: "retry_base_ms",
                value: format!("{} (max {})", cfg.retry_base_ms, cfg.retry_max_ms),
            });
        }
        let log_level =
            tracing::Level::from_str(cfg.log_level).map_err(|_| IrrigdError::InvalidSetting {
                name: "log_level",
                value: cfg.log_level.to_string(),
            })?;

        let credentials = (!cfg.mqtt_user.is_empty())
            .then(|| (cfg.mqtt_user.to_string(), cfg.mqtt_pass.to_string()));

        Ok(Self {
            mqtt: MqttSettings {
                host: cfg.mqtt_host.to_string(),
                port: cfg.mqtt_port,
                tls: cfg.mqtt_tls,
                credentials,
            },
            client_prefix: cfg.client_prefix.to_string(),
            topic_prefix: cfg.topic_prefix.to_string(),
            wifi_iface: cfg.wifi_iface.to_string(),
            sensor_device: PathBuf::from(cfg.sensor_device),
            framing: cfg.sensor_framing.parse()?,
            max_frame_len,
            sntp_server: cfg.sntp_server.to_string(),
            sntp_interval: Duration::from_secs(cfg.sntp_interval_secs.max(1)),
            retry: RetryPolicy {
                base: Duration::from_millis(cfg.retry_base_ms),
                max: Duration::from_millis(cfg.retry_max_ms),
            },
            log_dir: PathBuf::from(cfg.log_dir),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            mqtt_host: "broker.local",
            mqtt_port: 8883,
            mqtt_tls: true,
            mqtt_user: "irrigation",
            mqtt_pass: "secret",
            client_prefix: "whan_",
            topic_prefix: "irrig",
            wifi_iface: "wlan0",
            sensor_device: "/dev/ttyS1",
            sensor_framing: "delimited",
            max_frame_len: 16,
            sntp_server: "pool.ntp.org",
            sntp_interval_secs: 600,
            retry_base_ms: 250,
            retry_max_ms: 8000,
            log_dir: "/var/log/wirrigd",
            log_level: "debug",
        }
    }

    #[test]
    fn valid_settings() {
        let cfg = DeviceConfig::try_from(&base()).unwrap();
        assert_eq!(cfg.framing, Framing::Delimited);
        assert_eq!(cfg.log_level, tracing::Level::DEBUG);
        assert_eq!(
            cfg.mqtt.credentials,
            Some(("irrigation".to_string(), "secret".to_string()))
        );
        assert_eq!(cfg.retry.base, Duration::from_millis(250));
        assert_eq!(cfg.sntp_interval, Duration::from_secs(600));
    }

    #[test]
    fn anonymous_broker() {
        let cfg = DeviceConfig::try_from(&Config {
            mqtt_user: "",
            ..base()
        })
        .unwrap();
        assert!(cfg.mqtt.credentials.is_none());
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            DeviceConfig::try_from(&Config {
                sensor_framing: "morse",
                ..base()
            }),
            Err(IrrigdError::InvalidSetting {
                name: "sensor_framing",
                ..
            })
        ));
        assert!(DeviceConfig::try_from(&Config {
            max_frame_len: 65,
            ..base()
        })
        .is_err());
        assert!(DeviceConfig::try_from(&Config {
            retry_base_ms: 0,
            ..base()
        })
        .is_err());
        assert!(DeviceConfig::try_from(&Config {
            log_level: "chatty",
            ..base()
        })
        .is_err());
    }

    #[test]
    fn framing_names() {
        assert_eq!("HDLC".parse::<Framing>().unwrap(), Framing::Delimited);
        assert_eq!(
            "length-prefixed".parse::<Framing>().unwrap(),
            Framing::LengthPrefixed
        );
    }
}
