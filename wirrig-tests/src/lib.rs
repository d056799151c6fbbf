//! Test doubles shared by the harness binaries and integration tests

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use wirrig_link::{
    LinkError, LinkService, NetEvent, NetEventSender, SessionError, SessionParams,
    SessionTransport, StationDriver,
};
use wirrigp_sensor::{encode, FillSensorReading, StatusFlags};

/// Shared call counter, cloned into a double and read by the test
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Station driver that counts association requests and optionally
/// answers each one from a script of events
pub struct ScriptedStation {
    requests: Counter,
    events: Option<NetEventSender>,
    replies: Arc<Mutex<Vec<NetEvent>>>,
}

impl ScriptedStation {
    pub fn new(events: NetEventSender) -> Self {
        Self {
            requests: Counter::default(),
            events: Some(events),
            replies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Never replies, and holds no sender, so the supervisor exits as
    /// soon as the test drops its own
    pub fn silent() -> Self {
        Self {
            requests: Counter::default(),
            events: None,
            replies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Events posted in reply to successive association requests, first
    /// entry first. Requests past the end of the script get no reply.
    pub fn with_replies(self, replies: &[NetEvent]) -> Self {
        if let Ok(mut script) = self.replies.lock() {
            script.extend(replies.iter().rev());
        }
        self
    }

    pub fn requests(&self) -> Counter {
        self.requests.clone()
    }
}

impl StationDriver for ScriptedStation {
    fn request_association(&mut self) -> Result<(), LinkError> {
        self.requests.bump();
        let reply = self.replies.lock().ok().and_then(|mut script| script.pop());
        match (reply, &self.events) {
            (Some(event), Some(events)) => events.notify(event),
            _ => Ok(()),
        }
    }
}

/// Link service that only records its lifecycle
#[derive(Clone, Default)]
pub struct CountingService {
    pub starts: Counter,
    pub stops: Counter,
    running: Arc<AtomicBool>,
}

impl CountingService {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkService for CountingService {
    async fn start(&mut self) -> Result<(), LinkError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.bump();
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LinkError> {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stops.bump();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "counting service"
    }
}

/// Session transport that records opens, closes and publishes
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub opens: usize,
    pub closes: usize,
    pub published: Vec<(String, Vec<u8>)>,
}

impl SessionTransport for RecordingTransport {
    fn open(&mut self, _: &SessionParams, _: &[String]) -> Result<(), SessionError> {
        self.opens += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.closes += 1;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _: bool) -> Result<(), SessionError> {
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&mut self, _: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

pub fn reading(sequence: u16, fill_permille: u16) -> FillSensorReading {
    FillSensorReading {
        fill_permille,
        sequence,
        status: StatusFlags::empty(),
        quality: Some(95),
        missed: 0,
    }
}

/// A sensor capture: noise, valid frames, a corrupted frame, an
/// oversized frame whose body happens to hold a valid frame, and a
/// sequence gap
pub fn noisy_capture() -> Vec<u8> {
    let mut stream = vec![0x00, 0xFF, 0x42];
    stream.extend_from_slice(&encode::length_prefixed(&reading(1, 100)));
    stream.extend_from_slice(&encode::length_prefixed(&reading(2, 150)));

    let mut corrupted = encode::length_prefixed(&reading(3, 200));
    if let Some(crc) = corrupted.last_mut() {
        *crc ^= 0x5A;
    }
    stream.extend_from_slice(&corrupted);

    // declared length 60 exceeds a 32 byte limit, body and CRC are 61 bytes
    let oversize_start = stream.len();
    stream.extend_from_slice(&[wirrigp_sensor::FRAME_START, 60]);
    stream.extend_from_slice(&encode::length_prefixed(&reading(4, 999)));
    stream.resize(oversize_start + 2 + 61, 0x11);
    stream.extend_from_slice(&encode::length_prefixed(&reading(6, 250)));
    stream
}
