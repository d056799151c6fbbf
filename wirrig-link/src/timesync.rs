use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{net::UdpSocket, task::JoinHandle};

use crate::{LinkError, LinkService};

pub const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;
/// Seconds between the NTP era (1900) and the unix epoch
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
/// LI = 0, VN = 3, Mode = 3 (client)
const SNTP_REQUEST: u8 = 0x1B;
const MODE_SERVER: u8 = 4;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum TimeSyncError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Reply of {0} bytes is too short")]
    ShortReply(usize),
    #[error("Unexpected reply mode {0}")]
    UnexpectedMode(u8),
    #[error("Server is not synchronized")]
    Unsynchronized,
    #[error("No reply within {0:?}")]
    Timeout(Duration),
    #[error("Local clock is before the unix epoch")]
    ClockBeforeEpoch,
}

/// Offset of network time from the local clock, shared with whoever
/// timestamps data
#[derive(Debug, Clone, Default)]
pub struct ClockOffset(Arc<OffsetInner>);

#[derive(Debug, Default)]
struct OffsetInner {
    millis: AtomicI64,
    synced: AtomicBool,
}

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first successful query
    pub fn millis(&self) -> Option<i64> {
        self.0
            .synced
            .load(Ordering::Acquire)
            .then(|| self.0.millis.load(Ordering::Acquire))
    }

    pub fn set_millis(&self, millis: i64) {
        self.0.millis.store(millis, Ordering::Release);
        self.0.synced.store(true, Ordering::Release);
    }

    /// Local time corrected by the last known offset
    pub fn now(&self) -> SystemTime {
        let local = SystemTime::now();
        match self.millis() {
            Some(ms) if ms >= 0 => local + Duration::from_millis(ms.unsigned_abs()),
            Some(ms) => local - Duration::from_millis(ms.unsigned_abs()),
            None => local,
        }
    }
}

pub fn request_packet() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = SNTP_REQUEST;
    packet
}

/// Transmit timestamp of a server reply, as time since the unix epoch
pub fn parse_reply(reply: &[u8]) -> Result<Duration, TimeSyncError> {
    if reply.len() < NTP_PACKET_LEN {
        return Err(TimeSyncError::ShortReply(reply.len()));
    }
    let mode = reply[0] & 0x07;
    if mode != MODE_SERVER {
        return Err(TimeSyncError::UnexpectedMode(mode));
    }
    if reply[1] == 0 {
        return Err(TimeSyncError::Unsynchronized);
    }

    let secs = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]) as u64;
    let frac = u32::from_be_bytes([reply[44], reply[45], reply[46], reply[47]]) as u64;
    let secs = secs
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(TimeSyncError::Unsynchronized)?;
    let nanos = (frac * 1_000_000_000) >> 32;
    Ok(Duration::new(secs, nanos as u32))
}

fn since_epoch(t: SystemTime) -> Result<Duration, TimeSyncError> {
    t.duration_since(UNIX_EPOCH)
        .map_err(|_| TimeSyncError::ClockBeforeEpoch)
}

/// One SNTP exchange with `server` (`host:port`). Returns the offset of
/// server time from the local clock in milliseconds, measured against
/// the midpoint of the round trip.
pub async fn query(server: &str) -> Result<i64, TimeSyncError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(server).await?;

    let sent = since_epoch(SystemTime::now())?;
    socket.send(&request_packet()).await?;

    let mut buffer = [0u8; NTP_PACKET_LEN];
    let timeout = tokio::time::sleep(REPLY_TIMEOUT);
    let len = tokio::select! {
        _ = timeout => return Err(TimeSyncError::Timeout(REPLY_TIMEOUT)),
        res = socket.recv(&mut buffer) => res?,
    };
    let received = since_epoch(SystemTime::now())?;

    let server_time = parse_reply(&buffer[..len])?;
    let midpoint = (sent + received) / 2;
    Ok(server_time.as_millis() as i64 - midpoint.as_millis() as i64)
}

/// Periodic SNTP client. Runs only while the link is up; each query
/// refreshes the shared [`ClockOffset`]. A failed query is logged and
/// retried on the next tick.
pub struct SntpTimeSync {
    server: String,
    interval: Duration,
    offset: ClockOffset,
    task: Option<JoinHandle<()>>,
}

impl SntpTimeSync {
    pub fn new(server: &str, interval: Duration) -> Self {
        let server = if server.contains(':') {
            server.to_string()
        } else {
            format!("{server}:{NTP_PORT}")
        };
        Self {
            server,
            interval,
            offset: ClockOffset::new(),
            task: None,
        }
    }

    pub fn offset(&self) -> ClockOffset {
        self.offset.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

#[async_trait]
impl LinkService for SntpTimeSync {
    async fn start(&mut self) -> Result<(), LinkError> {
        if self.task.is_some() {
            return Ok(());
        }
        let server = self.server.clone();
        let interval = self.interval;
        let offset = self.offset.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                match query(&server).await {
                    Ok(ms) => {
                        log::info!("Clock offset from {server}: {ms} ms");
                        offset.set_millis(ms);
                    }
                    Err(e) => log::warn!("Time sync with {server} failed {e:}"),
                }
                tokio::time::sleep(interval).await;
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LinkError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "time sync"
    }
}

impl Drop for SntpTimeSync {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
