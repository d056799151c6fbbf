//! Host daemon for the irrigation controller: wires the station driver,
//! connectivity supervisor, messaging session and time sync together,
//! decodes the fill sensor stream, publishes telemetry, and routes
//! inbound commands to the controller.

pub mod commands;
pub mod config;
pub mod sensor;
pub mod station;
pub mod telemetry;

use thiserror::Error;
use wirrig_link::{ConfigError, LinkError, SessionError};

#[derive(Error, Debug)]
pub enum IrrigdError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Session Error")]
    Session(#[from] SessionError),
    #[error("Link Error")]
    Link(#[from] LinkError),
    #[error("Invalid setting {name}: {value}")]
    InvalidSetting { name: &'static str, value: String },
    #[error("Malformed hardware address {0:?}")]
    HardwareAddress(String),
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error("Telemetry encoding failed")]
    Encode(#[from] serde_json::Error),
}

pub type IrrigdResult<T> = Result<T, IrrigdError>;
