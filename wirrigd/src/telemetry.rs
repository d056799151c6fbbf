use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use wirrig_link::{ClockOffset, LinkStatus, SessionError, SessionTransport, SharedSession};
use wirrigp_sensor::{FillSensorReading, StatusFlags};

use crate::IrrigdResult;

/// JSON document published for every fill reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub fill_percent: f32,
    pub sequence: u16,
    pub status: StatusFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    pub missed: u16,
    pub ts: DateTime<Utc>,
}

impl Telemetry {
    pub fn new(reading: &FillSensorReading, ts: DateTime<Utc>) -> Self {
        Self {
            fill_percent: reading.fill_percent(),
            sequence: reading.sequence,
            status: reading.status,
            quality: reading.quality,
            missed: reading.missed,
            ts,
        }
    }
}

pub async fn publish_reading<T: SessionTransport>(
    session: &SharedSession<T>,
    topic: &str,
    reading: &FillSensorReading,
    ts: DateTime<Utc>,
) -> IrrigdResult<()> {
    let payload = serde_json::to_vec(&Telemetry::new(reading, ts))?;
    session.publish(topic, &payload, false).await?;
    Ok(())
}

/// Forward readings to the broker while the link is up. Readings that
/// arrive while disconnected are dropped; the sensor keeps counting, so
/// the next published sequence number shows the gap.
pub async fn run<T: SessionTransport>(
    mut readings: mpsc::Receiver<FillSensorReading>,
    session: SharedSession<T>,
    link: LinkStatus,
    topic: String,
    clock: ClockOffset,
) {
    while let Some(reading) = readings.recv().await {
        if reading.missed > 0 {
            log::info!("{} sensor frames lost before {}", reading.missed, reading.sequence);
        }
        if !link.is_connected() {
            log::debug!("Link down, dropping reading {}", reading.sequence);
            continue;
        }

        let ts = DateTime::<Utc>::from(clock.now());
        match publish_reading(&session, &topic, &reading, ts).await {
            Ok(()) => log::debug!("Published reading {}", reading.sequence),
            Err(crate::IrrigdError::Session(SessionError::Closed)) => {
                log::debug!("Session closed, dropping reading {}", reading.sequence)
            }
            Err(e) => log::warn!("Failed to publish reading {}: {e:}", reading.sequence),
        }
    }
    log::info!("Reading channel closed, telemetry task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wirrig_link::{ClientIdentity, MessagingSession, SessionParams};

    #[derive(Default)]
    struct Capture(Vec<(String, Vec<u8>)>);

    impl SessionTransport for Capture {
        fn open(&mut self, _: &SessionParams, _: &[String]) -> Result<(), SessionError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &[u8], _: bool) -> Result<(), SessionError> {
            self.0.push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn subscribe(&mut self, _: &str) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn reading() -> FillSensorReading {
        FillSensorReading {
            fill_permille: 425,
            sequence: 7,
            status: StatusFlags::LOW_SIGNAL,
            quality: Some(80),
            missed: 1,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap()
    }

    #[test]
    fn telemetry_json_shape() {
        let json = serde_json::to_value(Telemetry::new(&reading(), ts())).unwrap();
        assert_eq!(json["fill_percent"], 42.5);
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["status"], "LOW_SIGNAL");
        assert_eq!(json["quality"], 80);
        assert_eq!(json["missed"], 1);
        assert_eq!(json["ts"], "2024-05-01T06:30:00Z");

        let basic = FillSensorReading {
            quality: None,
            ..reading()
        };
        let json = serde_json::to_value(Telemetry::new(&basic, ts())).unwrap();
        assert!(json.get("quality").is_none());
    }

    #[tokio::test]
    async fn publish_needs_open_session() {
        let id = ClientIdentity::new("test").unwrap();
        let session = MessagingSession::configure(
            SessionParams::new("localhost", 1883, id),
            Capture::default(),
        )
        .unwrap();
        let shared = SharedSession::new(session);

        assert!(matches!(
            publish_reading(&shared, "irrig/x/fill", &reading(), ts()).await,
            Err(crate::IrrigdError::Session(SessionError::Closed))
        ));

        shared.lock().await.start().unwrap();
        publish_reading(&shared, "irrig/x/fill", &reading(), ts())
            .await
            .unwrap();

        let session = shared.lock().await;
        let (topic, payload) = &session.transport().0[0];
        assert_eq!(topic, "irrig/x/fill");
        let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(json["sequence"], 7);
    }
}
