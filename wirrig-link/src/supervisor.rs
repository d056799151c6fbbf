use std::{future, pin::Pin, time::Duration};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::Sleep,
};

use crate::{
    state::LinkStatusWriter, ConnectionState, LinkError, LinkService, LinkStatus, StationDriver,
};

/// Events reported by the wireless network stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    StationStarted,
    AddressAcquired,
    StationDisconnected,
    AssociationFailed,
}

/// Side effects requested by the [`LinkStateMachine`], carried out by
/// the supervisor task in the order given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    RequestAssociation,
    StartSession,
    StopSession,
    StartTimeSync,
    StopTimeSync,
}

const ASSOCIATE: &[LinkAction] = &[LinkAction::RequestAssociation];
const BRING_UP: &[LinkAction] = &[LinkAction::StartSession, LinkAction::StartTimeSync];
// Re-association is forced here: the station does not rejoin on its own
const TEAR_DOWN: &[LinkAction] = &[
    LinkAction::StopSession,
    LinkAction::StopTimeSync,
    LinkAction::RequestAssociation,
];

/// Pure transition table of the connectivity supervisor.
///
/// | state        | event               | next         | actions                          |
/// |--------------|---------------------|--------------|----------------------------------|
/// | Disconnected | StationStarted      | Associating  | associate                        |
/// | Associating  | AddressAcquired     | Connected    | start session, start time sync   |
/// | Connected    | StationDisconnected | Disconnected | stop session, stop time sync, associate |
/// | Associating  | AssociationFailed   | Disconnected | associate                        |
/// | Associating  | StationDisconnected | Disconnected | associate                        |
///
/// Every other pair is ignored. In particular a second `AddressAcquired`
/// while connected does not start the session again.
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    state: ConnectionState,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&mut self, event: NetEvent) -> &'static [LinkAction] {
        let (next, actions) = match (self.state, event) {
            (ConnectionState::Disconnected, NetEvent::StationStarted) => {
                (ConnectionState::Associating, ASSOCIATE)
            }
            (ConnectionState::Associating, NetEvent::AddressAcquired) => {
                (ConnectionState::Connected, BRING_UP)
            }
            (ConnectionState::Connected, NetEvent::StationDisconnected) => {
                (ConnectionState::Disconnected, TEAR_DOWN)
            }
            (ConnectionState::Associating, NetEvent::AssociationFailed)
            | (ConnectionState::Associating, NetEvent::StationDisconnected) => {
                (ConnectionState::Disconnected, ASSOCIATE)
            }
            (state, event) => {
                log::debug!("Ignoring {event:?} while {state:?}");
                return &[];
            }
        };
        self.state = next;
        actions
    }

    /// An association request went out while disconnected (a retry), so
    /// the station is joining again. Returns whether the state changed.
    pub fn association_requested(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Associating;
            true
        } else {
            false
        }
    }
}

/// Delay before each association retry. The first retry after a loss
/// goes out immediately; consecutive failures double the delay from
/// `base` up to `max`. Retries never stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `attempt` counts association requests since the link was last up
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Hand-off point for network stack callbacks. Cloneable, and
/// [`NetEventSender::notify`] never blocks.
#[derive(Debug, Clone)]
pub struct NetEventSender(mpsc::Sender<NetEvent>);

impl NetEventSender {
    /// Queue an event without waiting. Safe to call from a driver
    /// callback context.
    pub fn notify(&self, event: NetEvent) -> Result<(), LinkError> {
        self.0.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                log::error!("Network event queue full, dropping {event:?}");
                LinkError::QueueFull
            }
            TrySendError::Closed(_) => LinkError::SupervisorGone,
        })
    }

    pub async fn send(&self, event: NetEvent) -> Result<(), LinkError> {
        self.0
            .send(event)
            .await
            .map_err(|_| LinkError::SupervisorGone)
    }
}

#[derive(Debug)]
pub struct NetEventReceiver(mpsc::Receiver<NetEvent>);

impl NetEventReceiver {
    /// Next queued event, `None` once every sender is gone. Normally only
    /// the supervisor drains the queue.
    pub async fn recv(&mut self) -> Option<NetEvent> {
        self.0.recv().await
    }
}

/// Bounded queue between the network stack and the supervisor
pub fn net_event_channel(capacity: usize) -> (NetEventSender, NetEventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (NetEventSender(tx), NetEventReceiver(rx))
}

/// Owns the link state machine and drives the link-dependent services.
///
/// Runs as a single task that drains the [`NetEventReceiver`] in order,
/// so it is the only writer of the [`ConnectionState`] and needs no
/// locking. Everyone else reads the [`LinkStatus`] snapshots. The task
/// exits once every [`NetEventSender`] has been dropped.
pub struct ConnectivitySupervisor {
    machine: LinkStateMachine,
    events: NetEventReceiver,
    station: Box<dyn StationDriver>,
    session: Box<dyn LinkService>,
    time_sync: Box<dyn LinkService>,
    retry: RetryPolicy,
    /// Association requests issued since the link was last up
    attempts: u32,
    retry_timer: Option<Pin<Box<Sleep>>>,
    writer: LinkStatusWriter,
    status: LinkStatus,
}

impl ConnectivitySupervisor {
    pub fn new(
        events: NetEventReceiver,
        station: Box<dyn StationDriver>,
        session: Box<dyn LinkService>,
        time_sync: Box<dyn LinkService>,
        retry: RetryPolicy,
    ) -> Self {
        let (writer, status) = LinkStatusWriter::new();
        Self {
            machine: LinkStateMachine::new(),
            events,
            station,
            session,
            time_sync,
            retry,
            attempts: 0,
            retry_timer: None,
            writer,
            status,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status.clone()
    }

    pub fn spawn(self) -> (LinkStatus, JoinHandle<()>) {
        let status = self.status();
        (status, tokio::spawn(self.run()))
    }

    pub async fn run(mut self) {
        log::info!("Connectivity supervisor running");
        loop {
            tokio::select! {
                event = self.events.0.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => break,
                    }
                }
                _ = Self::retry_due(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    if self.machine.state() == ConnectionState::Disconnected {
                        self.associate();
                    }
                }
            }
        }
        log::warn!("Network event queue closed, supervisor exiting");
    }

    async fn retry_due(timer: &mut Option<Pin<Box<Sleep>>>) {
        match timer {
            Some(timer) => timer.as_mut().await,
            None => future::pending().await,
        }
    }

    async fn dispatch(&mut self, event: NetEvent) {
        let before = self.machine.state();
        let actions = self.machine.handle(event);
        let after = self.machine.state();

        if before != after {
            log::info!("Link {before:?} -> {after:?} on {event:?}");
            self.writer.publish(after);
        }
        if after == ConnectionState::Connected {
            self.attempts = 0;
            self.retry_timer = None;
        }

        for action in actions {
            self.execute(*action).await;
        }
    }

    async fn execute(&mut self, action: LinkAction) {
        match action {
            LinkAction::RequestAssociation => self.schedule_association(),
            LinkAction::StartSession => start_service(self.session.as_mut()).await,
            LinkAction::StopSession => stop_service(self.session.as_mut()).await,
            LinkAction::StartTimeSync => start_service(self.time_sync.as_mut()).await,
            LinkAction::StopTimeSync => stop_service(self.time_sync.as_mut()).await,
        }
    }

    fn schedule_association(&mut self) {
        let delay = self.retry.delay(self.attempts);
        if delay.is_zero() {
            self.associate();
        } else {
            log::info!(
                "Retrying association in {delay:?} ({} attempts since link was up)",
                self.attempts
            );
            self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
        }
    }

    fn associate(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        if self.machine.association_requested() {
            self.writer.publish(ConnectionState::Associating);
        }

        if let Err(e) = self.station.request_association() {
            log::error!("Association request failed {e:}");
            if !self.machine.handle(NetEvent::AssociationFailed).is_empty() {
                self.writer.publish(self.machine.state());
            }
            // always through the timer, so a failing driver cannot spin
            let delay = self.retry.delay(self.attempts).max(self.retry.base);
            self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
        }
    }
}

async fn start_service(service: &mut dyn LinkService) {
    match service.start().await {
        Ok(()) => log::debug!("Started {}", service.name()),
        Err(e) => log::error!("Failed to start {}: {e:}", service.name()),
    }
}

async fn stop_service(service: &mut dyn LinkService) {
    match service.stop().await {
        Ok(()) => log::debug!("Stopped {}", service.name()),
        Err(e) => log::error!("Failed to stop {}: {e:}", service.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    const EVENTS: [NetEvent; 4] = [
        NetEvent::StationStarted,
        NetEvent::AddressAcquired,
        NetEvent::StationDisconnected,
        NetEvent::AssociationFailed,
    ];

    fn table(state: ConnectionState, event: NetEvent) -> ConnectionState {
        use ConnectionState::*;
        match (state, event) {
            (Disconnected, NetEvent::StationStarted) => Associating,
            (Associating, NetEvent::AddressAcquired) => Connected,
            (Connected, NetEvent::StationDisconnected) => Disconnected,
            (Associating, NetEvent::AssociationFailed) => Disconnected,
            (Associating, NetEvent::StationDisconnected) => Disconnected,
            (state, _) => state,
        }
    }

    fn sequences(len: usize) -> Vec<Vec<NetEvent>> {
        (0..EVENTS.len().pow(len as u32))
            .map(|mut n| {
                (0..len)
                    .map(|_| {
                        let event = EVENTS[n % EVENTS.len()];
                        n /= EVENTS.len();
                        event
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn replay_matches_table_fold() {
        for len in 1..=6 {
            for events in sequences(len) {
                let mut machine = LinkStateMachine::new();
                let mut expected = ConnectionState::Disconnected;
                let mut open_sessions = 0i32;

                for &event in &events {
                    expected = table(expected, event);
                    for action in machine.handle(event) {
                        match action {
                            LinkAction::StartSession => open_sessions += 1,
                            LinkAction::StopSession => open_sessions -= 1,
                            _ => {}
                        }
                    }
                    assert_eq!(machine.state(), expected, "replaying {events:?}");
                    assert!((0..=1).contains(&open_sessions), "replaying {events:?}");
                    assert_eq!(
                        open_sessions == 1,
                        machine.state() == ConnectionState::Connected,
                        "replaying {events:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn repeated_address_does_not_restart_session() {
        let mut machine = LinkStateMachine::new();
        machine.handle(NetEvent::StationStarted);
        assert_eq!(machine.handle(NetEvent::AddressAcquired), BRING_UP);
        assert!(machine.handle(NetEvent::AddressAcquired).is_empty());
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn retry_request_moves_to_associating() {
        let mut machine = LinkStateMachine::new();
        machine.handle(NetEvent::StationStarted);
        assert!(!machine.association_requested());
        machine.handle(NetEvent::StationStarted);
        machine.handle(NetEvent::AddressAcquired);
        machine.handle(NetEvent::StationDisconnected);
        assert!(machine.association_requested());
        assert_eq!(machine.handle(NetEvent::AddressAcquired), BRING_UP);
        assert!(!machine.association_requested());
    }

    #[test]
    fn retry_backoff_is_bounded() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_secs(1));
        assert_eq!(policy.delay(64), Duration::from_secs(1));
    }

    #[derive(Clone, Default)]
    struct Calls {
        requests: Arc<AtomicUsize>,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    struct Station(Calls);

    impl StationDriver for Station {
        fn request_association(&mut self) -> Result<(), LinkError> {
            self.0.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Service(Calls);

    #[async_trait]
    impl LinkService for Service {
        async fn start(&mut self) -> Result<(), LinkError> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), LinkError> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting service"
        }
    }

    fn supervisor(retry: RetryPolicy) -> (NetEventSender, ConnectivitySupervisor, [Calls; 3]) {
        let calls = [Calls::default(), Calls::default(), Calls::default()];
        let (events, queue) = net_event_channel(8);
        let supervisor = ConnectivitySupervisor::new(
            queue,
            Box::new(Station(calls[0].clone())),
            Box::new(Service(calls[1].clone())),
            Box::new(Service(calls[2].clone())),
            retry,
        );
        (events, supervisor, calls)
    }

    #[tokio::test]
    async fn connect_then_disconnect() {
        let (events, supervisor, [station, session, time_sync]) =
            supervisor(RetryPolicy::default());
        let (status, task) = supervisor.spawn();

        events.notify(NetEvent::StationStarted).unwrap();
        events.notify(NetEvent::AddressAcquired).unwrap();
        events.notify(NetEvent::StationDisconnected).unwrap();
        drop(events);
        task.await.unwrap();

        assert_eq!(station.requests.load(Ordering::SeqCst), 2);
        assert_eq!(session.starts.load(Ordering::SeqCst), 1);
        assert_eq!(session.stops.load(Ordering::SeqCst), 1);
        assert_eq!(time_sync.starts.load(Ordering::SeqCst), 1);
        assert_eq!(time_sync.stops.load(Ordering::SeqCst), 1);

        assert!(!status.is_connected());
        assert!(status.has_disconnected());
        // the forced re-association is already under way
        assert_eq!(status.state(), ConnectionState::Associating);
    }

    #[tokio::test]
    async fn reconnect_after_forced_reassociation() {
        let (events, supervisor, [station, session, _]) = supervisor(RetryPolicy::default());
        let (status, task) = supervisor.spawn();

        for event in [
            NetEvent::StationStarted,
            NetEvent::AddressAcquired,
            NetEvent::AddressAcquired,
            NetEvent::StationDisconnected,
            NetEvent::AddressAcquired,
        ] {
            events.send(event).await.unwrap();
        }
        drop(events);
        task.await.unwrap();

        assert_eq!(station.requests.load(Ordering::SeqCst), 2);
        assert_eq!(session.starts.load(Ordering::SeqCst), 2);
        assert_eq!(session.stops.load(Ordering::SeqCst), 1);
        assert!(status.is_connected());
        assert!(!status.has_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_back_off() {
        let retry = RetryPolicy {
            base: Duration::from_millis(50),
            max: Duration::from_millis(400),
        };
        let (events, supervisor, [station, _, _]) = supervisor(retry);
        let (status, _task) = supervisor.spawn();
        let started = tokio::time::Instant::now();

        events.send(NetEvent::StationStarted).await.unwrap();
        events.send(NetEvent::AssociationFailed).await.unwrap();

        while station.requests.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(started.elapsed() >= retry.base);
        assert_eq!(status.state(), ConnectionState::Associating);
        assert!(status.has_disconnected());
    }
}
