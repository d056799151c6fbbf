use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::task::JoinHandle;
use wirrig_link::{HardwareAddress, LinkError, NetEvent, NetEventSender, StationDriver};

use crate::{IrrigdError, IrrigdResult};

pub const SYSFS_NET: &str = "/sys/class/net";
pub const DEFAULT_POLL: Duration = Duration::from_secs(1);

/// Operational state of a network interface as reported by sysfs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
}

impl OperState {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            // drivers without carrier reporting say "unknown" once running
            "up" | "unknown" => OperState::Up,
            _ => OperState::Down,
        }
    }
}

fn iface_dir(root: &Path, iface: &str) -> PathBuf {
    root.join(iface)
}

/// Blocking read, for the synchronous [`StationDriver`] call. A sysfs
/// attribute read does not wait on the device.
pub fn read_operstate(root: &Path, iface: &str) -> std::io::Result<OperState> {
    let raw = std::fs::read_to_string(iface_dir(root, iface).join("operstate"))?;
    Ok(OperState::parse(&raw))
}

pub async fn poll_operstate(root: &Path, iface: &str) -> std::io::Result<OperState> {
    let raw = tokio::fs::read_to_string(iface_dir(root, iface).join("operstate")).await?;
    Ok(OperState::parse(&raw))
}

/// Parse a colon separated MAC such as `24:0a:c4:ab:00:ff`
pub fn parse_mac(raw: &str) -> IrrigdResult<HardwareAddress> {
    let digits: String = raw.trim().split(':').collect();
    let mut mac = [0u8; 6];
    hex::decode_to_slice(&digits, &mut mac)
        .map_err(|_| IrrigdError::HardwareAddress(raw.trim().to_string()))?;
    Ok(mac)
}

pub fn read_mac(root: &Path, iface: &str) -> IrrigdResult<HardwareAddress> {
    let raw = std::fs::read_to_string(iface_dir(root, iface).join("address"))?;
    parse_mac(&raw)
}

/// Station driver for a Linux host. Association itself is left to the
/// system's supplicant; requesting it checks whether the interface is
/// already up and reports the outcome as a network event.
pub struct SysfsStation {
    root: PathBuf,
    iface: String,
    events: NetEventSender,
}

impl SysfsStation {
    pub fn new(iface: &str, events: NetEventSender) -> Self {
        Self::with_root(SYSFS_NET, iface, events)
    }

    pub fn with_root(root: impl Into<PathBuf>, iface: &str, events: NetEventSender) -> Self {
        Self {
            root: root.into(),
            iface: iface.to_string(),
            events,
        }
    }

    pub fn mac(&self) -> IrrigdResult<HardwareAddress> {
        read_mac(&self.root, &self.iface)
    }

    /// Watch the interface and post transitions to the supervisor
    pub fn watch(&self, poll: Duration) -> JoinHandle<()> {
        let watcher = LinkWatcher {
            root: self.root.clone(),
            iface: self.iface.clone(),
            events: self.events.clone(),
            poll,
        };
        tokio::spawn(watcher.run())
    }
}

impl StationDriver for SysfsStation {
    fn request_association(&mut self) -> Result<(), LinkError> {
        let state = read_operstate(&self.root, &self.iface)?;
        log::info!("Association requested on {}, interface is {state:?}", self.iface);
        match state {
            OperState::Up => self.events.notify(NetEvent::AddressAcquired),
            OperState::Down => self.events.notify(NetEvent::AssociationFailed),
        }
    }
}

struct LinkWatcher {
    root: PathBuf,
    iface: String,
    events: NetEventSender,
    poll: Duration,
}

impl LinkWatcher {
    async fn run(self) {
        if self.events.send(NetEvent::StationStarted).await.is_err() {
            return;
        }
        let mut last = None;
        let mut tick = tokio::time::interval(self.poll);
        loop {
            tick.tick().await;
            let state = match poll_operstate(&self.root, &self.iface).await {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Unable to read operstate of {}: {e:}", self.iface);
                    OperState::Down
                }
            };
            if last == Some(state) {
                continue;
            }

            let event = match (last, state) {
                (_, OperState::Up) => Some(NetEvent::AddressAcquired),
                (Some(OperState::Up), OperState::Down) => Some(NetEvent::StationDisconnected),
                _ => None,
            };
            last = Some(state);
            if let Some(event) = event {
                log::debug!("{} is now {state:?}", self.iface);
                if self.events.send(event).await.is_err() {
                    log::warn!("Supervisor gone, link watcher for {} exiting", self.iface);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirrig_link::net_event_channel;

    fn fake_sysfs(name: &str, operstate: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("wirrigd-{name}-{}", std::process::id()));
        let dir = root.join("wlan0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("operstate"), operstate).unwrap();
        std::fs::write(dir.join("address"), "24:0a:c4:ab:00:ff\n").unwrap();
        root
    }

    #[test]
    fn mac_from_sysfs() {
        let root = fake_sysfs("mac", "up\n");
        assert_eq!(
            read_mac(&root, "wlan0").unwrap(),
            [0x24, 0x0a, 0xc4, 0xab, 0x00, 0xff]
        );
        assert!(matches!(
            parse_mac("24:0a:c4"),
            Err(IrrigdError::HardwareAddress(_))
        ));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn operstate_values() {
        assert_eq!(OperState::parse("up\n"), OperState::Up);
        assert_eq!(OperState::parse("unknown"), OperState::Up);
        assert_eq!(OperState::parse("dormant"), OperState::Down);
        assert_eq!(OperState::parse("down"), OperState::Down);
    }

    #[tokio::test]
    async fn association_outcome_is_reported() {
        let root = fake_sysfs("assoc", "down\n");
        let (events, mut queue) = net_event_channel(4);
        let mut station = SysfsStation::with_root(&root, "wlan0", events);

        station.request_association().unwrap();
        std::fs::write(root.join("wlan0").join("operstate"), "up\n").unwrap();
        station.request_association().unwrap();

        assert_eq!(queue.recv().await, Some(NetEvent::AssociationFailed));
        assert_eq!(queue.recv().await, Some(NetEvent::AddressAcquired));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_reports_transitions() {
        let root = fake_sysfs("watch", "up\n");
        let (events, mut queue) = net_event_channel(4);
        let station = SysfsStation::with_root(&root, "wlan0", events);
        let task = station.watch(Duration::from_millis(10));

        assert_eq!(queue.recv().await, Some(NetEvent::StationStarted));
        assert_eq!(queue.recv().await, Some(NetEvent::AddressAcquired));

        std::fs::write(root.join("wlan0").join("operstate"), "down\n").unwrap();
        assert_eq!(queue.recv().await, Some(NetEvent::StationDisconnected));

        task.abort();
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn missing_interface_is_an_io_error() {
        let root = std::env::temp_dir().join(format!("wirrigd-none-{}", std::process::id()));
        let (events, _queue) = net_event_channel(4);
        let mut station = SysfsStation::with_root(&root, "wlan0", events);

        assert!(matches!(
            poll_operstate(&root, "wlan0").await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound
        ));
        assert!(matches!(
            station.request_association(),
            Err(LinkError::Io(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_treats_unreadable_state_as_down() {
        let root = fake_sysfs("vanish", "up\n");
        let (events, mut queue) = net_event_channel(4);
        let station = SysfsStation::with_root(&root, "wlan0", events);
        let task = station.watch(Duration::from_millis(10));

        assert_eq!(queue.recv().await, Some(NetEvent::StationStarted));
        assert_eq!(queue.recv().await, Some(NetEvent::AddressAcquired));

        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(queue.recv().await, Some(NetEvent::StationDisconnected));
        task.abort();
    }
}
