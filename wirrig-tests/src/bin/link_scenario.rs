use std::time::Duration;

use wirrig_link::{net_event_channel, ConnectivitySupervisor, NetEvent, RetryPolicy};
use wirrig_tests::{CountingService, ScriptedStation};

/// Drives the supervisor through a flapping link: two failed joins, a
/// connection, a drop, and a reconnect answered by the station itself
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    log::info!("Initializing supervisor");

    let (events, queue) = net_event_channel(16);
    let station = ScriptedStation::new(events.clone()).with_replies(&[
        NetEvent::AssociationFailed,
        NetEvent::AssociationFailed,
        NetEvent::AddressAcquired,
        NetEvent::AddressAcquired,
    ]);
    let requests = station.requests();
    let session = CountingService::default();
    let time_sync = CountingService::default();

    let (status, task) = ConnectivitySupervisor::new(
        queue,
        Box::new(station),
        Box::new(session.clone()),
        Box::new(time_sync.clone()),
        RetryPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        },
    )
    .spawn();

    events.notify(NetEvent::StationStarted).map_err(|e| {
        log::error!("Error posting station start {e:}");
        e
    })?;
    status.wait_connected().await?;
    log::info!(
        "Connected after {} association requests, session running: {}",
        requests.get(),
        session.is_running()
    );

    events.notify(NetEvent::StationDisconnected)?;
    while session.starts.get() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    log::info!(
        "Reconnected after {} association requests, session started {} times, stopped {} times",
        requests.get(),
        session.starts.get(),
        session.stops.get()
    );

    // the station holds a sender too, so the supervisor will not exit on its own
    task.abort();
    log::info!(
        "Time sync started {} times, stopped {} times",
        time_sync.starts.get(),
        time_sync.stops.get()
    );

    Ok(())
}
