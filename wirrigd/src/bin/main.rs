use tokio::sync::mpsc::{channel, unbounded_channel};

use tracing_appender::rolling;
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;
use wirrig_link::{
    net_event_channel, ClientIdentity, ConnectivitySupervisor, MessagingSession, RumqttTransport,
    SessionParams, SharedSession, SntpTimeSync, TopicSet,
};
use wirrigd::{
    commands::{self, ControllerCommand},
    config::DeviceConfig,
    sensor,
    station::{SysfsStation, DEFAULT_POLL},
    telemetry, IrrigdError, IrrigdResult,
};

const EVENT_QUEUE: usize = 16;
const READING_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> IrrigdResult<()> {
    let config = DeviceConfig::from_build()?;

    LogTracer::init().map_err(|e| IrrigdError::Logging(e.to_string()))?;
    let log = rolling::daily(&config.log_dir, "wirrigd");
    let (nb, _guard) = tracing_appender::non_blocking(log);
    let sub = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_writer(nb)
        .finish();
    tracing::subscriber::set_global_default(sub)
        .map_err(|e| IrrigdError::Logging(e.to_string()))?;

    let (events, queue) = net_event_channel(EVENT_QUEUE);
    let station = SysfsStation::new(&config.wifi_iface, events.clone());
    let mac = station.mac()?;
    let identity = ClientIdentity::from_hardware(&config.client_prefix, &mac)?;
    let topics = TopicSet::new(&config.topic_prefix, &mac)?;
    log::info!("Controller {identity} publishing to {}", topics.telemetry());

    let mut params = SessionParams::new(config.mqtt.host.as_str(), config.mqtt.port, identity)
        .with_tls(config.mqtt.tls)
        .with_status_topic(topics.status());
    if let Some((user, pass)) = &config.mqtt.credentials {
        params = params.with_credentials(user, pass);
    }

    let (inbound_tx, inbound_rx) = unbounded_channel();
    let mut session = MessagingSession::configure(params, RumqttTransport::new(inbound_tx))?;
    for topic in topics.subscriptions() {
        session.subscribe(topic)?;
    }
    let session = SharedSession::new(session);

    let time_sync = SntpTimeSync::new(&config.sntp_server, config.sntp_interval);
    let clock = time_sync.offset();

    let (status, supervisor) = ConnectivitySupervisor::new(
        queue,
        Box::new(station),
        Box::new(session.clone()),
        Box::new(time_sync),
        config.retry,
    )
    .spawn();
    let watcher = SysfsStation::new(&config.wifi_iface, events).watch(DEFAULT_POLL);

    let (reading_tx, reading_rx) = channel(READING_QUEUE);
    let (sensor_device, framing, max_frame_len) =
        (config.sensor_device.clone(), config.framing, config.max_frame_len);
    let sensor_task = tokio::spawn(async move {
        if let Err(e) =
            sensor::run_device(&sensor_device, framing, max_frame_len, reading_tx).await
        {
            log::error!("Sensor task failed {e:}");
        }
    });

    tokio::spawn(telemetry::run(
        reading_rx,
        session.clone(),
        status.clone(),
        topics.telemetry().to_string(),
        clock,
    ));

    // valve actuation and scheduling run outside the daemon
    let (controller_tx, mut controller_rx) = unbounded_channel::<ControllerCommand>();
    tokio::spawn(commands::run(inbound_rx, topics, controller_tx));
    tokio::spawn(async move {
        while let Some(cmd) = controller_rx.recv().await {
            log::info!("Controller command {cmd:?}");
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Unable to listen for shutdown signal {e:}");
    }
    log::info!("Shutting down");

    watcher.abort();
    sensor_task.abort();
    supervisor.abort();
    if let Err(e) = session.lock().await.stop() {
        log::warn!("Session did not close cleanly {e:}");
    }

    Ok(())
}
